use std::collections::HashMap;
use std::io::Read;

use log::{info, warn};

use crate::{
    config::AttritionConfig,
    data::SurvivalTarget,
    error::{AttritionError, Result},
    pipeline::{FeatureImportanceTable, TrainedPipeline, TrainingPipeline, ValidationOutcome},
    scoring::{RiskScoreTable, RiskScorer},
    table::{
        Column, EmployeeTable, NamedColumn, ATTRITION, CATEGORICAL_FEATURES, CONSTANT_COLUMNS, IDENTIFIER,
        NUMERIC_FEATURES, YEARS_AT_COMPANY,
    },
};

/// everything a training run hands back
#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// the raw table as trained on, after load-time cleaning
    pub cleaned_data: EmployeeTable,
    pub pipeline: TrainedPipeline,
    pub validation: ValidationOutcome,
    pub feature_importance: FeatureImportanceTable,
    /// active employees only, with `YearsAtCompany` re-attached
    pub risk_scores: RiskScoreTable,
}

impl TrainingReport {
    /// `None` when the validation partition had nothing to rank
    pub fn concordance_index(&self) -> Option<f64> {
        match &self.validation {
            ValidationOutcome::Scored(c) => Some(c.c_index),
            ValidationOutcome::Undefined { .. } => None,
        }
    }
}

/// read the raw csv, drop the constant columns, map `Attrition` to 1/0
pub fn load_raw_employees<R: Read>(reader: R) -> Result<EmployeeTable> {
    let raw = EmployeeTable::from_csv_reader(reader)?;
    if raw.is_empty() {
        return Err(AttritionError::data("raw employee data is empty"));
    }

    let mut table = raw.without_columns(&CONSTANT_COLUMNS);
    if table.has_column(ATTRITION) {
        let flags = attrition_flags(&table.require(ATTRITION)?)?;
        let encoded = flags.iter().map(|&left| if left { 1.0 } else { 0.0 }).collect();
        table = table.with_column(NamedColumn::numeric(ATTRITION, encoded))?;
    }

    info!("loaded {} employees with {} columns", table.n_rows(), table.n_columns());
    Ok(table)
}

/// `Attrition` as event flags; accepts Yes/No, true/false and 1/0
pub fn attrition_flags(column: &Column) -> Result<Vec<bool>> {
    match column {
        Column::Integer(values) => values
            .iter()
            .map(|&v| match v {
                1 => Ok(true),
                0 => Ok(false),
                _ => Err(AttritionError::data(format!("{} must be 0 or 1, got {}", ATTRITION, v))),
            })
            .collect(),
        Column::Numeric(values) => values
            .iter()
            .map(|&v| {
                if v == 1.0 {
                    Ok(true)
                } else if v == 0.0 {
                    Ok(false)
                } else {
                    Err(AttritionError::data(format!("{} must be 0 or 1, got {}", ATTRITION, v)))
                }
            })
            .collect(),
        Column::Categorical(values) => values
            .iter()
            .map(|v| match v.to_ascii_lowercase().as_str() {
                "yes" | "true" | "1" => Ok(true),
                "no" | "false" | "0" => Ok(false),
                _ => Err(AttritionError::data(format!("unrecognised {} value `{}`", ATTRITION, v))),
            })
            .collect(),
    }
}

/// the training boundary: identifier, every feature column, both target columns
pub fn validate_training_table(raw: &EmployeeTable) -> Result<()> {
    if raw.is_empty() {
        return Err(AttritionError::data("cannot train on an empty table"));
    }
    raw.require_columns(
        std::iter::once(IDENTIFIER)
            .chain(NUMERIC_FEATURES)
            .chain(CATEGORICAL_FEATURES)
            .chain([ATTRITION, YEARS_AT_COMPANY]),
    )?;
    raw.identifiers()?;
    Ok(())
}

/// `Attrition` -> event, `YearsAtCompany` -> time
pub fn survival_target(raw: &EmployeeTable) -> Result<SurvivalTarget> {
    let events = attrition_flags(&raw.require(ATTRITION)?)?;
    let times = raw.numeric(YEARS_AT_COMPANY)?;
    SurvivalTarget::new(events, times)
}

/// fit, validate and score the raw HR table
pub fn train_attrition_model(raw: &EmployeeTable, config: &AttritionConfig) -> Result<TrainingReport> {
    config.validate()?;
    validate_training_table(raw)?;

    let target = survival_target(raw)?;
    let features = raw.without_columns(&[ATTRITION, YEARS_AT_COMPANY]);
    info!("training on {} employees, {} departures", target.n_samples(), target.n_events());

    let run = TrainingPipeline::from_config(&config.training).fit(&features, &target)?;
    let validation = run.validation.clone();
    let pipeline = match &validation {
        ValidationOutcome::Scored(_) => run.into_pipeline(),
        ValidationOutcome::Undefined { reason } if config.training.accept_undefined_concordance => {
            warn!("accepting model without a validation score: {}", reason);
            run.into_pipeline()
        }
        ValidationOutcome::Undefined { reason } => return Err(AttritionError::metric_undefined(reason.clone())),
    };

    let feature_importance = pipeline.feature_importances()?;

    let active: Vec<usize> = (0..target.n_samples()).filter(|&i| !target.events()[i]).collect();
    if active.is_empty() {
        return Err(AttritionError::data("no active employees left to score"));
    }
    let scored = RiskScorer::new(&pipeline).score(&features.select_rows(&active)?)?;

    let tenure: HashMap<i64, f64> = raw.identifiers()?.into_iter().zip(target.times().iter().copied()).collect();
    let years = scored
        .identifiers()?
        .iter()
        .map(|id| {
            tenure
                .get(id)
                .copied()
                .ok_or_else(|| AttritionError::data(format!("unknown {} {}", IDENTIFIER, id)))
        })
        .collect::<Result<Vec<f64>>>()?;
    let risk_scores = scored.with_column(NamedColumn::numeric(YEARS_AT_COMPANY, years))?;

    Ok(TrainingReport {
        cleaned_data: raw.clone(),
        pipeline,
        validation,
        feature_importance,
        risk_scores,
    })
}
