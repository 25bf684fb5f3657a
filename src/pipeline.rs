use std::io::{Read, Write};

use log::{info, warn};
use ndarray::Array1;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{
    config::TrainingConfig,
    data::SurvivalTarget,
    error::{AttritionError, Result},
    metrics::{concordance_index_censored, Concordance},
    model::{SurvivalEstimator, SurvivalFunction, SurvivalModel},
    preprocessing::FeaturePreprocessor,
    reshape::{FeatureFrame, OutputReshaper},
    split::train_validation_split,
    table::EmployeeTable,
};

/// one row of the importance report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    #[serde(rename = "Feature")]
    pub feature: String,
    #[serde(rename = "Importance")]
    pub importance: f64,
}

/// per transformed feature importance, highest first
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureImportanceTable {
    rows: Vec<FeatureImportance>,
}

impl FeatureImportanceTable {
    pub fn new(names: &[String], importances: &Array1<f64>) -> Result<Self> {
        if names.len() != importances.len() {
            return Err(AttritionError::data(format!(
                "{} feature names for {} importances",
                names.len(),
                importances.len()
            )));
        }

        let mut rows: Vec<FeatureImportance> = names
            .iter()
            .zip(importances.iter())
            .map(|(name, &importance)| FeatureImportance { feature: name.clone(), importance })
            .collect();
        rows.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[FeatureImportance] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, feature: &str) -> Option<f64> {
        self.rows.iter().find(|r| r.feature == feature).map(|r| r.importance)
    }

    /// write `Feature,Importance` csv
    pub fn to_csv_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// read a `Feature,Importance` csv, re-sorted highest first
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            let row: FeatureImportance = row?;
            if !row.importance.is_finite() {
                return Err(AttritionError::data(format!("importance of `{}` is not finite", row.feature)));
            }
            rows.push(row);
        }
        rows.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        Ok(Self { rows })
    }
}

/// fitted preprocessor + reshaper + estimator, immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedPipeline<M = SurvivalModel> {
    preprocessor: FeaturePreprocessor,
    reshaper: OutputReshaper,
    model: M,
}

impl<M: SurvivalEstimator> TrainedPipeline<M> {
    pub fn preprocessor(&self) -> &FeaturePreprocessor {
        &self.preprocessor
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn feature_names(&self) -> Result<&[String]> {
        self.reshaper.feature_names()
    }

    /// raw employee rows -> named feature frame
    pub fn transform(&self, employees: &EmployeeTable) -> Result<FeatureFrame> {
        let values = self.preprocessor.transform(employees)?;
        self.reshaper.transform(values)
    }

    /// risk score per row, input order
    pub fn predict(&self, employees: &EmployeeTable) -> Result<Array1<f64>> {
        self.model.predict_risk(&self.transform(employees)?)
    }

    pub fn predict_survival_function(&self, employees: &EmployeeTable) -> Result<Vec<SurvivalFunction>> {
        self.model.survival_functions(&self.transform(employees)?)
    }

    /// model importances labelled with the transformed feature names
    pub fn feature_importances(&self) -> Result<FeatureImportanceTable> {
        FeatureImportanceTable::new(self.feature_names()?, &self.model.importances()?)
    }
}

impl<M: Serialize> TrainedPipeline<M> {
    /// opaque artifact handed to the registry
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }
}

impl<M: DeserializeOwned> TrainedPipeline<M> {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }
}

/// how the held-out partition judged the model
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Scored(Concordance),
    /// no departures (or no comparable pairs) in the validation rows
    Undefined { reason: String },
}

/// result of one training run: a fresh pipeline and its validation score
#[derive(Debug, Clone)]
pub struct TrainingRun<M = SurvivalModel> {
    pub pipeline: TrainedPipeline<M>,
    pub validation: ValidationOutcome,
    pub n_train: usize,
    pub n_validation: usize,
}

impl<M> TrainingRun<M> {
    pub fn concordance(&self) -> Result<&Concordance> {
        match &self.validation {
            ValidationOutcome::Scored(c) => Ok(c),
            ValidationOutcome::Undefined { reason } => Err(AttritionError::metric_undefined(reason.clone())),
        }
    }

    /// held-out concordance; MetricUndefined when the split had no events
    pub fn concordance_index(&self) -> Result<f64> {
        self.concordance().map(|c| c.c_index)
    }

    /// pipeline plus its score, failing when the score is undefined
    pub fn into_validated(self) -> Result<(TrainedPipeline<M>, Concordance)> {
        let concordance = *self.concordance()?;
        Ok((self.pipeline, concordance))
    }

    /// accept the pipeline whatever the validation said
    pub fn into_pipeline(self) -> TrainedPipeline<M> {
        self.pipeline
    }
}

/// fit/validate recipe: preprocessor template, estimator template, split settings
#[derive(Debug, Clone)]
pub struct TrainingPipeline<M = SurvivalModel> {
    preprocessor: FeaturePreprocessor,
    estimator: M,
    validation_split: f64,
    random_state: u64,
}

impl TrainingPipeline<SurvivalModel> {
    /// attrition schema + boosted model from config
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(FeaturePreprocessor::default(), config.model())
            .with_validation_split(config.validation_split)
            .with_random_state(config.random_state)
    }
}

impl<M: SurvivalEstimator> TrainingPipeline<M> {
    pub fn new(preprocessor: FeaturePreprocessor, estimator: M) -> Self {
        Self {
            preprocessor,
            estimator,
            validation_split: 0.2,
            random_state: 42,
        }
    }

    /// held-out fraction, must be in (0, 1)
    pub fn with_validation_split(mut self, fraction: f64) -> Self {
        self.validation_split = fraction;
        self
    }

    /// seed for the row split
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// split, fit on the training rows, score concordance on the held-out rows
    pub fn fit(&self, features: &EmployeeTable, target: &SurvivalTarget) -> Result<TrainingRun<M>> {
        if features.n_rows() != target.n_samples() {
            return Err(AttritionError::data(format!(
                "feature rows ({}) != target rows ({})",
                features.n_rows(),
                target.n_samples()
            )));
        }
        if features.is_empty() {
            return Err(AttritionError::data("cannot train on an empty table"));
        }

        let split = train_validation_split(features.n_rows(), self.validation_split, self.random_state)?;
        let train_x = features.select_rows(&split.train)?;
        let train_y = target.subset(&split.train)?;
        let valid_x = features.select_rows(&split.validation)?;
        let valid_y = target.subset(&split.validation)?;
        info!(
            "split {} employees: {} train ({} events), {} validation ({} events)",
            features.n_rows(),
            train_y.n_samples(),
            train_y.n_events(),
            valid_y.n_samples(),
            valid_y.n_events()
        );

        let mut preprocessor = self.preprocessor.unfitted();
        preprocessor.fit(&train_x)?;
        let mut reshaper = OutputReshaper::new();
        reshaper.fit(&preprocessor)?;

        let train_frame = reshaper.transform(preprocessor.transform(&train_x)?)?;
        let valid_frame = reshaper.transform(preprocessor.transform(&valid_x)?)?;

        let mut model = self.estimator.unfitted();
        model.fit_frame(&train_frame, &train_y)?;

        let valid_risk = model.predict_risk(&valid_frame)?;
        let validation = match concordance_index_censored(valid_y.events(), valid_y.times(), valid_risk.view()) {
            Ok(c) => {
                info!("validation {}", c);
                ValidationOutcome::Scored(c)
            }
            Err(AttritionError::MetricUndefined { message }) => {
                warn!("validation concordance undefined: {}", message);
                ValidationOutcome::Undefined { reason: message }
            }
            Err(e) => return Err(e),
        };

        Ok(TrainingRun {
            pipeline: TrainedPipeline { preprocessor, reshaper, model },
            validation,
            n_train: split.train.len(),
            n_validation: split.validation.len(),
        })
    }
}
