//! # attrition survival
//!
//! employee attrition as a survival problem - who leaves, and how soon
//!
//! ## what you get
//!
//! - sklearn-style preprocessing (standardize numerics, one-hot categoricals)
//! - gradient boosted survival model on the cox partial likelihood
//! - censored concordance on a held-out split
//! - ranked risk tables + per-employee survival curves
//! - json model artifacts, a local model store, toml config
//!
//! ## quick start
//!
//! ```rust
//! use attrition_survival::{
//!     EmployeeTable, FeaturePreprocessor, NamedColumn, RiskScorer, SurvivalCurveExtractor,
//!     SurvivalModel, SurvivalTarget, TrainingPipeline,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let employees = EmployeeTable::new(vec![
//!     NamedColumn::numeric("EmployeeNumber", (1..=12u32).map(f64::from).collect()),
//!     NamedColumn::numeric("Age", vec![22., 25., 31., 45., 38., 29., 52., 41., 27., 35., 48., 24.]),
//!     NamedColumn::categorical("OverTime", vec!["Yes", "Yes", "No", "No", "No", "Yes", "No", "No", "Yes", "No", "No", "Yes"]),
//! ])?;
//! // true = left the company, false = still employed (censored)
//! let left = vec![true, true, false, false, true, true, false, false, true, true, false, true];
//! let tenure = vec![1., 2., 5., 12., 7., 3., 20., 9., 2., 6., 15., 1.];
//! let target = SurvivalTarget::new(left, tenure)?;
//!
//! let preprocessor = FeaturePreprocessor::new(["Age"], ["OverTime"]).with_dropped(["EmployeeNumber"]);
//! let run = TrainingPipeline::new(preprocessor, SurvivalModel::new().with_n_estimators(20))
//!     .with_validation_split(0.25)
//!     .fit(&employees, &target)?;
//! let pipeline = run.into_pipeline();
//!
//! // highest risk first
//! let scores = RiskScorer::new(&pipeline).score(&employees)?;
//! let (top, curves) = SurvivalCurveExtractor::new(&pipeline).extract(&scores, 3)?;
//! assert_eq!(top.n_rows(), 3);
//! assert!(!curves.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod curves;
pub mod data;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod preprocessing;
pub mod registry;
pub mod reshape;
pub mod scoring;
pub mod split;
pub mod table;
pub mod tree;
pub mod workflow;

pub use config::{AttritionConfig, DataSource, ModelTarget, TrainingConfig};
pub use curves::{SurvivalCurveExtractor, SurvivalCurvePoint, SurvivalCurveTable};
pub use data::SurvivalTarget;
pub use error::{AttritionError, Result};
pub use metrics::{concordance_index_censored, Concordance};
pub use model::{SurvivalEstimator, SurvivalFunction, SurvivalModel};
pub use pipeline::{FeatureImportanceTable, TrainedPipeline, TrainingPipeline, TrainingRun, ValidationOutcome};
pub use preprocessing::FeaturePreprocessor;
pub use registry::{
    load_training_outputs, open_model_store, save_training_outputs, LocalModelStore, ModelStore, TrainingOutputs,
};
pub use reshape::{FeatureFrame, OutputReshaper};
pub use scoring::{RiskScoreTable, RiskScorer};
pub use table::{Column, EmployeeTable, NamedColumn};
pub use workflow::{load_raw_employees, train_attrition_model, TrainingReport};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_functionality() {
        let n_samples = 10;
        let table = EmployeeTable::new(vec![
            NamedColumn::numeric("EmployeeNumber", (0..n_samples).map(|i| i as f64).collect()),
            NamedColumn::categorical("Department", vec!["Sales"; n_samples]),
        ])
        .unwrap();
        let target = SurvivalTarget::new(vec![true; n_samples], vec![1.0; n_samples]).unwrap();

        assert_eq!(table.n_rows(), n_samples);
        assert_eq!(target.n_samples(), n_samples);
        assert_eq!(table.identifiers().unwrap().len(), n_samples);
    }
}
