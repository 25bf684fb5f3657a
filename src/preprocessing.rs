use std::collections::BTreeSet;

use log::debug;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{AttritionError, Result};
use crate::table::{EmployeeTable, CATEGORICAL_FEATURES, IDENTIFIER, NUMERIC_FEATURES};

/// mean/scale pair for one standardized column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnScaler {
    pub column: String,
    pub mean: f64,
    pub scale: f64, // population std, 1.0 for constant columns
}

/// sorted vocabulary for one one-hot column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEncoder {
    pub column: String,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedColumns {
    scalers: Vec<ColumnScaler>,
    encoders: Vec<CategoryEncoder>,
    passthrough: Vec<String>,
    feature_names: Vec<String>,
}

/// standardize numerics, one-hot categoricals, pass the rest through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePreprocessor {
    numeric_columns: Vec<String>,
    categorical_columns: Vec<String>,
    drop_columns: Vec<String>,
    fitted: Option<FittedColumns>,
}

impl Default for FeaturePreprocessor {
    /// the attrition schema, identifier dropped
    fn default() -> Self {
        Self::new(NUMERIC_FEATURES, CATEGORICAL_FEATURES).with_dropped([IDENTIFIER])
    }
}

impl FeaturePreprocessor {
    pub fn new<N, C>(numeric: N, categorical: C) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            numeric_columns: numeric.into_iter().map(Into::into).collect(),
            categorical_columns: categorical.into_iter().map(Into::into).collect(),
            drop_columns: Vec::new(),
            fitted: None,
        }
    }

    /// columns that are neither transformed nor passed through
    pub fn with_dropped<D>(mut self, columns: D) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
    {
        self.drop_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn numeric_columns(&self) -> &[String] {
        &self.numeric_columns
    }

    pub fn categorical_columns(&self) -> &[String] {
        &self.categorical_columns
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// same column configuration, no fitted state
    pub fn unfitted(&self) -> Self {
        Self { fitted: None, ..self.clone() }
    }

    /// learn means, scales and vocabularies from `table`
    pub fn fit(&mut self, table: &EmployeeTable) -> Result<&mut Self> {
        if table.is_empty() {
            return Err(AttritionError::data("cannot fit preprocessor on an empty table"));
        }
        table.require_columns(
            self.numeric_columns.iter().chain(&self.categorical_columns).map(String::as_str),
        )?;

        let n = table.n_rows() as f64;
        let mut scalers = Vec::with_capacity(self.numeric_columns.len());
        for column in &self.numeric_columns {
            let values = table.numeric(column)?;
            let mean = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = variance.sqrt();
            if !mean.is_finite() || !std.is_finite() {
                return Err(AttritionError::data(format!("column `{}` has non-finite values", column)));
            }
            scalers.push(ColumnScaler {
                column: column.clone(),
                mean,
                scale: if std > 0.0 { std } else { 1.0 },
            });
        }

        let mut encoders = Vec::with_capacity(self.categorical_columns.len());
        for column in &self.categorical_columns {
            let values = table.require(column)?;
            let categories: BTreeSet<String> =
                (0..table.n_rows()).map(|i| values.label(i).into_owned()).collect();
            encoders.push(CategoryEncoder {
                column: column.clone(),
                categories: categories.into_iter().collect(),
            });
        }

        let mut passthrough = Vec::new();
        for name in table.column_names() {
            if self.numeric_columns.iter().chain(&self.categorical_columns).chain(&self.drop_columns).any(|c| c == name) {
                continue;
            }
            if !table.is_numeric(name)? {
                return Err(AttritionError::data(format!(
                    "column `{}` is neither numeric, categorical nor dropped",
                    name
                )));
            }
            passthrough.push(name.to_string());
        }

        let mut feature_names: Vec<String> = scalers.iter().map(|s| s.column.clone()).collect();
        for encoder in &encoders {
            feature_names.extend(encoder.categories.iter().map(|c| format!("{}_{}", encoder.column, c)));
        }
        feature_names.extend(passthrough.iter().cloned());

        self.fitted = Some(FittedColumns { scalers, encoders, passthrough, feature_names });
        Ok(self)
    }

    fn fitted(&self) -> Result<&FittedColumns> {
        self.fitted.as_ref().ok_or_else(|| AttritionError::not_fitted("preprocessor"))
    }

    /// output column names, in matrix order
    pub fn feature_names_out(&self) -> Result<&[String]> {
        Ok(&self.fitted()?.feature_names)
    }

    pub fn scalers(&self) -> Result<&[ColumnScaler]> {
        Ok(&self.fitted()?.scalers)
    }

    pub fn encoders(&self) -> Result<&[CategoryEncoder]> {
        Ok(&self.fitted()?.encoders)
    }

    /// apply the frozen transform; columns unknown at fit time are ignored
    pub fn transform(&self, table: &EmployeeTable) -> Result<Array2<f64>> {
        let fitted = self.fitted()?;
        table.require_columns(
            fitted
                .scalers
                .iter()
                .map(|s| s.column.as_str())
                .chain(fitted.encoders.iter().map(|e| e.column.as_str()))
                .chain(fitted.passthrough.iter().map(String::as_str)),
        )?;

        let n_rows = table.n_rows();
        let mut out = Array2::zeros((n_rows, fitted.feature_names.len()));
        let mut offset = 0;

        for scaler in &fitted.scalers {
            let values = finite_values(table, &scaler.column)?;
            for (i, v) in values.iter().enumerate() {
                out[[i, offset]] = (v - scaler.mean) / scaler.scale;
            }
            offset += 1;
        }

        for encoder in &fitted.encoders {
            let values = table.require(&encoder.column)?;
            for i in 0..n_rows {
                let label = values.label(i);
                match encoder.categories.binary_search_by(|c| c.as_str().cmp(&label)) {
                    Ok(k) => out[[i, offset + k]] = 1.0,
                    Err(_) => debug!("unseen category `{}` in column `{}`, encoded as zeros", label, encoder.column),
                }
            }
            offset += encoder.categories.len();
        }

        for column in &fitted.passthrough {
            let values = finite_values(table, column)?;
            for (i, &v) in values.iter().enumerate() {
                out[[i, offset]] = v;
            }
            offset += 1;
        }

        Ok(out)
    }
}

fn finite_values(table: &EmployeeTable, column: &str) -> Result<Vec<f64>> {
    let values = table.numeric(column)?;
    let bad = values.iter().filter(|v| !v.is_finite()).count();
    if bad > 0 {
        return Err(AttritionError::data(format!("column `{}` has {} non-finite values", column, bad)));
    }
    Ok(values)
}
