use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AttritionError, Result};
use crate::model::SurvivalModel;

/// where raw employee data is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    #[default]
    Local,
    Remote,
}

/// where trained pipelines are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTarget {
    #[default]
    Local,
    Remote,
    Registry,
}

/// split + boosting hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub validation_split: f64,
    pub random_state: u64,
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub subsample: f64,
    /// keep a model whose validation partition had no departures
    pub accept_undefined_concordance: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            validation_split: 0.2,
            random_state: 42,
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 1,
            subsample: 1.0,
            accept_undefined_concordance: false,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return Err(AttritionError::validation("validation_split", self.validation_split));
        }
        if self.n_estimators == 0 {
            return Err(AttritionError::validation("n_estimators", self.n_estimators));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(AttritionError::validation("learning_rate", self.learning_rate));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(AttritionError::validation("subsample", self.subsample));
        }
        if self.min_samples_split < 2 {
            return Err(AttritionError::validation("min_samples_split", self.min_samples_split));
        }
        if self.min_samples_leaf == 0 {
            return Err(AttritionError::validation("min_samples_leaf", self.min_samples_leaf));
        }
        Ok(())
    }

    /// unfitted model carrying these hyper-parameters
    pub fn model(&self) -> SurvivalModel {
        SurvivalModel::new()
            .with_n_estimators(self.n_estimators)
            .with_learning_rate(self.learning_rate)
            .with_max_depth(self.max_depth)
            .with_min_samples_split(self.min_samples_split)
            .with_min_samples_leaf(self.min_samples_leaf)
            .with_subsample(self.subsample)
            .with_random_state(self.random_state)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttritionConfig {
    pub data_source: DataSource,
    pub model_target: ModelTarget,
    /// directory holding the raw csv and the training output tables
    pub local_cache_dir: PathBuf,
    /// raw csv file name inside `local_cache_dir`
    pub raw_data: String,
    /// raw data after load-time cleaning, as trained on
    pub cleaned_data_file: String,
    pub feature_importance_file: String,
    pub risk_score_file: String,
    /// root of the local model registry
    pub registry_dir: PathBuf,
    pub training: TrainingConfig,
}

impl Default for AttritionConfig {
    fn default() -> Self {
        Self {
            data_source: DataSource::Local,
            model_target: ModelTarget::Local,
            local_cache_dir: PathBuf::from("raw_data"),
            raw_data: "employee_attrition.csv".to_string(),
            cleaned_data_file: "cleaned_data.csv".to_string(),
            feature_importance_file: "feature_importance.csv".to_string(),
            risk_score_file: "risk_scores.csv".to_string(),
            registry_dir: PathBuf::from("training_outputs"),
            training: TrainingConfig::default(),
        }
    }
}

impl AttritionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// read and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.raw_data.trim().is_empty() {
            return Err(AttritionError::config("raw_data file name is empty"));
        }
        self.training.validate()
    }

    /// where the raw training csv lives
    pub fn raw_data_path(&self) -> Result<PathBuf> {
        match self.data_source {
            DataSource::Local => Ok(self.local_cache_dir.join(&self.raw_data)),
            DataSource::Remote => Err(AttritionError::config(
                "data_source = remote has no built-in reader; fetch the csv and pass it in",
            )),
        }
    }

    pub fn cleaned_data_path(&self) -> PathBuf {
        self.local_cache_dir.join(&self.cleaned_data_file)
    }

    pub fn feature_importance_path(&self) -> PathBuf {
        self.local_cache_dir.join(&self.feature_importance_file)
    }

    pub fn risk_score_path(&self) -> PathBuf {
        self.local_cache_dir.join(&self.risk_score_file)
    }
}
