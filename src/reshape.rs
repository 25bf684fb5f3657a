use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{AttritionError, Result};
use crate::preprocessing::FeaturePreprocessor;

/// preprocessed feature matrix with its column names attached
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    names: Vec<String>,
    values: Array2<f64>,
}

impl FeatureFrame {
    pub fn new(names: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if names.len() != values.ncols() {
            return Err(AttritionError::data(format!(
                "{} feature names for a matrix with {} columns",
                names.len(),
                values.ncols()
            )));
        }
        Ok(Self { names, values })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn n_samples(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    /// one feature by name
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|j| self.values.column(j))
    }

    pub fn into_values(self) -> Array2<f64> {
        self.values
    }
}

/// reattaches a fitted preprocessor's column names to its raw output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputReshaper {
    feature_names: Option<Vec<String>>,
}

impl OutputReshaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// freeze the names of an already fitted preprocessor
    pub fn fit(&mut self, preprocessor: &FeaturePreprocessor) -> Result<&mut Self> {
        self.feature_names = Some(preprocessor.feature_names_out()?.to_vec());
        Ok(self)
    }

    pub fn is_fitted(&self) -> bool {
        self.feature_names.is_some()
    }

    pub fn feature_names(&self) -> Result<&[String]> {
        self.feature_names
            .as_deref()
            .ok_or_else(|| AttritionError::not_fitted("output reshaper"))
    }

    /// label the matrix - no numeric change
    pub fn transform(&self, values: Array2<f64>) -> Result<FeatureFrame> {
        FeatureFrame::new(self.feature_names()?.to_vec(), values)
    }
}
