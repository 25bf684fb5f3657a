use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use crate::{
    config::{AttritionConfig, ModelTarget},
    error::{AttritionError, Result},
    pipeline::{FeatureImportanceTable, TrainedPipeline},
    scoring::RiskScoreTable,
    table::EmployeeTable,
    workflow::TrainingReport,
};

/// persistence seam for trained pipelines
pub trait ModelStore: Send + Sync {
    /// store a pipeline, returning the key it was saved under
    fn save(&self, pipeline: &TrainedPipeline) -> Result<String>;

    /// most recently saved pipeline
    fn load_latest(&self) -> Result<TrainedPipeline>;
}

/// `<root>/models/<millis>.json`, newest = largest name
#[derive(Debug, Clone)]
pub struct LocalModelStore {
    models_dir: PathBuf,
}

impl LocalModelStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { models_dir: root.as_ref().join("models") }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// saved model files, oldest first
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.models_dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.models_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn next_path(&self) -> Result<PathBuf> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AttritionError::config(format!("system clock before unix epoch: {}", e)))?;

        // zero padded so names sort chronologically; bump on collision
        let mut millis = now.as_millis();
        loop {
            let path = self.models_dir.join(format!("{:020}.json", millis));
            if !path.exists() {
                return Ok(path);
            }
            millis += 1;
        }
    }
}

impl ModelStore for LocalModelStore {
    fn save(&self, pipeline: &TrainedPipeline) -> Result<String> {
        fs::create_dir_all(&self.models_dir)?;
        let path = self.next_path()?;
        pipeline.to_writer(BufWriter::new(File::create(&path)?))?;
        info!("saved model to {}", path.display());
        Ok(path.display().to_string())
    }

    fn load_latest(&self) -> Result<TrainedPipeline> {
        let latest = self.list()?.pop().ok_or_else(|| {
            AttritionError::data(format!("no saved model under {}", self.models_dir.display()))
        })?;
        info!("loading model from {}", latest.display());
        TrainedPipeline::from_reader(BufReader::new(File::open(latest)?))
    }
}

/// the store selected by `model_target`
///
/// Only the local backend ships with the crate; remote and registry targets
/// need a caller-provided [`ModelStore`].
pub fn open_model_store(config: &AttritionConfig) -> Result<Box<dyn ModelStore>> {
    match config.model_target {
        ModelTarget::Local => Ok(Box::new(LocalModelStore::new(&config.registry_dir))),
        ModelTarget::Remote => Err(AttritionError::config(
            "model_target = remote needs an object-storage ModelStore",
        )),
        ModelTarget::Registry => Err(AttritionError::config(
            "model_target = registry needs an experiment-tracking ModelStore",
        )),
    }
}

/// the tables a training run leaves in the cache dir for serving
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutputs {
    pub cleaned_data: EmployeeTable,
    pub feature_importance: FeatureImportanceTable,
    pub risk_scores: RiskScoreTable,
}

/// write the cleaned data, feature importance and risk score csvs into the cache dir
pub fn save_training_outputs(report: &TrainingReport, config: &AttritionConfig) -> Result<()> {
    fs::create_dir_all(&config.local_cache_dir)?;

    let cleaned_path = config.cleaned_data_path();
    report.cleaned_data.to_csv_writer(BufWriter::new(File::create(&cleaned_path)?))?;

    let importance_path = config.feature_importance_path();
    report
        .feature_importance
        .to_csv_writer(BufWriter::new(File::create(&importance_path)?))?;

    let risk_path = config.risk_score_path();
    report.risk_scores.to_csv_writer(BufWriter::new(File::create(&risk_path)?))?;

    info!(
        "wrote {}, {} and {}",
        cleaned_path.display(),
        importance_path.display(),
        risk_path.display()
    );
    Ok(())
}

/// read back what [`save_training_outputs`] wrote
pub fn load_training_outputs(config: &AttritionConfig) -> Result<TrainingOutputs> {
    let open = |path: PathBuf| -> Result<BufReader<File>> {
        File::open(&path)
            .map(BufReader::new)
            .map_err(|e| AttritionError::data(format!("cannot open {}: {}", path.display(), e)))
    };

    let outputs = TrainingOutputs {
        cleaned_data: EmployeeTable::from_csv_reader(open(config.cleaned_data_path())?)?,
        feature_importance: FeatureImportanceTable::from_csv_reader(open(config.feature_importance_path())?)?,
        risk_scores: RiskScoreTable::from_csv_reader(open(config.risk_score_path())?)?,
    };
    info!(
        "loaded {} cleaned rows, {} importances, {} risk scores",
        outputs.cleaned_data.n_rows(),
        outputs.feature_importance.len(),
        outputs.risk_scores.n_rows()
    );
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::data::SurvivalTarget;
    use crate::model::SurvivalModel;
    use crate::pipeline::{TrainingPipeline, ValidationOutcome};
    use crate::preprocessing::FeaturePreprocessor;
    use crate::scoring::RiskScorer;
    use crate::table::{NamedColumn, IDENTIFIER};

    fn create_test_pipeline(n_estimators: usize) -> (EmployeeTable, TrainedPipeline) {
        let n = 20;
        let table = EmployeeTable::new(vec![
            NamedColumn::numeric(IDENTIFIER, (0..n).map(|i| i as f64).collect()),
            NamedColumn::numeric("Age", (0..n).map(|i| 25.0 + i as f64).collect()),
        ])
        .unwrap();
        let target = SurvivalTarget::new(
            (0..n).map(|i| i % 3 != 0).collect(),
            (0..n).map(|i| 1.0 + (i % 7) as f64).collect(),
        )
        .unwrap();

        let preprocessor = FeaturePreprocessor::new(["Age"], Vec::<String>::new()).with_dropped([IDENTIFIER]);
        let pipeline = TrainingPipeline::new(preprocessor, SurvivalModel::new().with_n_estimators(n_estimators))
            .fit(&table, &target)
            .unwrap()
            .into_pipeline();
        (table, pipeline)
    }

    #[test]
    fn test_save_then_load_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalModelStore::new(dir.path());

        let (table, first) = create_test_pipeline(5);
        let (_, second) = create_test_pipeline(10);
        store.save(&first).unwrap();
        store.save(&second).unwrap();

        assert_eq!(store.list().unwrap().len(), 2);
        let loaded = store.load_latest().unwrap();
        assert_eq!(loaded.model().n_estimators(), 10);
        let before = second.predict(&table).unwrap();
        let after = loaded.predict(&table).unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalModelStore::new(dir.path());
        assert!(store.list().unwrap().is_empty());
        assert!(matches!(store.load_latest(), Err(AttritionError::Data { .. })));
    }

    #[test]
    fn test_open_model_store() {
        let mut config = AttritionConfig::default();
        assert!(open_model_store(&config).is_ok());

        for target in [ModelTarget::Remote, ModelTarget::Registry] {
            config.model_target = target;
            assert!(matches!(open_model_store(&config), Err(AttritionError::Config { .. })));
        }
    }

    #[test]
    fn test_training_outputs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = AttritionConfig { local_cache_dir: dir.path().join("cache"), ..AttritionConfig::default() };

        let (table, pipeline) = create_test_pipeline(5);
        let report = TrainingReport {
            cleaned_data: table.clone(),
            feature_importance: pipeline.feature_importances().unwrap(),
            risk_scores: RiskScorer::new(&pipeline).score(&table).unwrap(),
            validation: ValidationOutcome::Undefined { reason: "not scored".into() },
            pipeline,
        };
        save_training_outputs(&report, &config).unwrap();
        assert!(config.cleaned_data_path().exists());

        let outputs = load_training_outputs(&config).unwrap();
        assert_eq!(outputs.cleaned_data.identifiers().unwrap(), table.identifiers().unwrap());
        assert_eq!(outputs.cleaned_data.numeric("Age").unwrap(), table.numeric("Age").unwrap());
        assert_eq!(outputs.feature_importance, report.feature_importance);
        assert_eq!(outputs.risk_scores.identifiers().unwrap(), report.risk_scores.identifiers().unwrap());
        for (a, b) in outputs.risk_scores.risks().unwrap().iter().zip(report.risk_scores.risks().unwrap()) {
            assert_relative_eq!(*a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_missing_outputs_are_data_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config = AttritionConfig { local_cache_dir: dir.path().to_path_buf(), ..AttritionConfig::default() };
        let err = load_training_outputs(&config).unwrap_err();
        assert!(matches!(err, AttritionError::Data { .. }));
        assert!(err.to_string().contains("cleaned_data.csv"));
    }
}
