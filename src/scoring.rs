use std::io::{Read, Write};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AttritionError, Result},
    model::{SurvivalEstimator, SurvivalModel},
    pipeline::TrainedPipeline,
    table::{EmployeeTable, NamedColumn, IDENTIFIER, PREDICTED_RISK},
};

/// employees ranked by `PredictedRisk`, highest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EmployeeTable", into = "EmployeeTable")]
pub struct RiskScoreTable {
    table: EmployeeTable,
}

impl TryFrom<EmployeeTable> for RiskScoreTable {
    type Error = AttritionError;

    fn try_from(table: EmployeeTable) -> Result<Self> {
        Self::from_table(table)
    }
}

impl From<RiskScoreTable> for EmployeeTable {
    fn from(scores: RiskScoreTable) -> Self {
        scores.table
    }
}

impl RiskScoreTable {
    /// adopt a table that already carries `PredictedRisk`, e.g. one read back from disk
    ///
    /// Rows are re-sorted by risk, ties keep their order.
    pub fn from_table(table: EmployeeTable) -> Result<Self> {
        table.identifiers()?;
        let risk = table.numeric(PREDICTED_RISK)?;
        if risk.iter().any(|r| !r.is_finite()) {
            return Err(AttritionError::data(format!("{} must be finite", PREDICTED_RISK)));
        }

        let order = descending_order(&risk);
        let table = table.select_rows(&order)?;
        Ok(Self { table })
    }

    pub fn table(&self) -> &EmployeeTable {
        &self.table
    }

    pub fn into_table(self) -> EmployeeTable {
        self.table
    }

    pub fn n_rows(&self) -> usize {
        self.table.n_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn identifiers(&self) -> Result<Vec<i64>> {
        self.table.identifiers()
    }

    pub fn risks(&self) -> Result<Vec<f64>> {
        self.table.numeric(PREDICTED_RISK)
    }

    /// the `n` riskiest employees (all of them if `n` is larger)
    pub fn head(&self, n: usize) -> Result<Self> {
        let rows: Vec<usize> = (0..n.min(self.n_rows())).collect();
        Ok(Self { table: self.table.select_rows(&rows)? })
    }

    /// attach an extra column; `PredictedRisk` itself cannot be replaced
    pub fn with_column(self, column: NamedColumn) -> Result<Self> {
        if column.name == PREDICTED_RISK || column.name == IDENTIFIER {
            return Err(AttritionError::data(format!("cannot overwrite `{}` in a risk table", column.name)));
        }
        Ok(Self { table: self.table.with_column(column)? })
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        Self::from_table(EmployeeTable::from_csv_reader(reader)?)
    }

    pub fn to_csv_writer<W: Write>(&self, writer: W) -> Result<()> {
        self.table.to_csv_writer(writer)
    }
}

/// row indices sorted by score, highest first, stable on ties
fn descending_order(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order
}

/// applies a trained pipeline to employee records and ranks them by risk
#[derive(Debug, Clone, Copy)]
pub struct RiskScorer<'a, M = SurvivalModel> {
    pipeline: &'a TrainedPipeline<M>,
}

impl<'a, M: SurvivalEstimator> RiskScorer<'a, M> {
    pub fn new(pipeline: &'a TrainedPipeline<M>) -> Self {
        Self { pipeline }
    }

    /// preprocess, predict, append `PredictedRisk`, sort descending
    pub fn score(&self, employees: &EmployeeTable) -> Result<RiskScoreTable> {
        if employees.is_empty() {
            return Err(AttritionError::data("empty employee table received"));
        }
        employees.identifiers()?;

        let features = employees.without_columns(&[PREDICTED_RISK]);
        let risk = self.pipeline.predict(&features)?;
        let risk = risk.to_vec();
        if risk.iter().any(|r| !r.is_finite()) {
            return Err(AttritionError::training_failure("model produced non-finite risk scores"));
        }

        let order = descending_order(&risk);
        let table = employees
            .clone()
            .with_column(NamedColumn::numeric(PREDICTED_RISK, risk))?
            .select_rows(&order)?;
        info!("scored {} employees", table.n_rows());

        Ok(RiskScoreTable { table })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SurvivalTarget;
    use crate::preprocessing::FeaturePreprocessor;
    use crate::pipeline::TrainingPipeline;

    fn create_test_data() -> (EmployeeTable, SurvivalTarget) {
        let n = 40;
        let overtime: Vec<&str> = (0..n).map(|i| if i % 2 == 0 { "Yes" } else { "No" }).collect();
        let distance: Vec<f64> = (0..n).map(|i| (i % 10) as f64).collect();
        let times: Vec<f64> = (0..n)
            .map(|i| 10.0 - distance[i] * 0.5 - if i % 2 == 0 { 3.0 } else { 0.0 })
            .collect();
        let events: Vec<bool> = (0..n).map(|i| i % 5 != 0).collect();

        let table = EmployeeTable::new(vec![
            NamedColumn::numeric(IDENTIFIER, (0..n).map(|i| 1000.0 + i as f64).collect()),
            NamedColumn::numeric("DistanceFromHome", distance),
            NamedColumn::categorical("OverTime", overtime),
        ])
        .unwrap();
        (table, SurvivalTarget::new(events, times).unwrap())
    }

    fn trained() -> (EmployeeTable, TrainedPipeline) {
        let (table, target) = create_test_data();
        let preprocessor = FeaturePreprocessor::new(["DistanceFromHome"], ["OverTime"]).with_dropped([IDENTIFIER]);
        let pipeline = TrainingPipeline::new(preprocessor, SurvivalModel::new().with_n_estimators(20))
            .fit(&table, &target)
            .unwrap()
            .into_pipeline();
        (table, pipeline)
    }

    #[test]
    fn test_score_sorted_descending() {
        let (table, pipeline) = trained();
        let scores = RiskScorer::new(&pipeline).score(&table).unwrap();

        assert_eq!(scores.n_rows(), 40);
        let risks = scores.risks().unwrap();
        for pair in risks.windows(2) {
            assert!(pair[0] >= pair[1]);
        }

        // same risk as predicting directly, just reordered
        let direct = pipeline.predict(&table).unwrap();
        let ids = scores.identifiers().unwrap();
        for (id, risk) in ids.iter().zip(&risks) {
            let row = (*id - 1000) as usize;
            assert_eq!(direct[row], *risk);
        }
    }

    #[test]
    fn test_empty_table_is_data_error() {
        let (table, pipeline) = trained();
        let empty = table.select_rows(&[]).unwrap();
        let err = RiskScorer::new(&pipeline).score(&empty).unwrap_err();
        assert!(matches!(err, AttritionError::Data { .. }));
        assert!(err.to_string().contains("empty employee table"));
    }

    #[test]
    fn test_non_finite_feature_is_data_error() {
        let (table, pipeline) = trained();
        let two = table
            .select_rows(&[0, 1])
            .unwrap()
            .with_column(NamedColumn::numeric("DistanceFromHome", vec![f64::NAN, f64::NAN]))
            .unwrap();

        let err = RiskScorer::new(&pipeline).score(&two).unwrap_err();
        assert!(matches!(err, AttritionError::Data { .. }));
        assert!(err.to_string().contains("DistanceFromHome"));
    }

    #[test]
    fn test_missing_identifier_is_data_error() {
        let (table, pipeline) = trained();
        let anonymous = table.without_columns(&[IDENTIFIER]);
        assert!(matches!(RiskScorer::new(&pipeline).score(&anonymous), Err(AttritionError::Data { .. })));
    }

    #[test]
    fn test_rescoring_replaces_risk() {
        let (table, pipeline) = trained();
        let scorer = RiskScorer::new(&pipeline);
        let first = scorer.score(&table).unwrap();
        let second = scorer.score(first.table()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_from_table_resorts() {
        let table = EmployeeTable::new(vec![
            NamedColumn::numeric(IDENTIFIER, vec![1.0, 2.0, 3.0]),
            NamedColumn::numeric(PREDICTED_RISK, vec![0.1, 0.9, 0.5]),
        ])
        .unwrap();
        let scores = RiskScoreTable::from_table(table).unwrap();
        assert_eq!(scores.identifiers().unwrap(), vec![2, 3, 1]);
        assert_eq!(scores.head(2).unwrap().identifiers().unwrap(), vec![2, 3]);
        assert_eq!(scores.head(10).unwrap().n_rows(), 3);
    }

    #[test]
    fn test_from_table_needs_risk() {
        let table = EmployeeTable::new(vec![NamedColumn::numeric(IDENTIFIER, vec![1.0])]).unwrap();
        assert!(matches!(RiskScoreTable::from_table(table), Err(AttritionError::Data { .. })));
    }

    #[test]
    fn test_csv_round_trip() {
        let (table, pipeline) = trained();
        let scores = RiskScorer::new(&pipeline).score(&table).unwrap();

        let mut buf = Vec::new();
        scores.to_csv_writer(&mut buf).unwrap();
        let restored = RiskScoreTable::from_csv_reader(buf.as_slice()).unwrap();
        assert_eq!(restored.identifiers().unwrap(), scores.identifiers().unwrap());
    }
}
