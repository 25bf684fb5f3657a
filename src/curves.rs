use std::io::Write;

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AttritionError, Result},
    model::{SurvivalEstimator, SurvivalModel},
    pipeline::TrainedPipeline,
    scoring::RiskScoreTable,
    table::PREDICTED_RISK,
};

/// one knot of one employee's survival curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurvivalCurvePoint {
    #[serde(rename = "EmployeeNumber")]
    pub employee_number: i64,
    #[serde(rename = "Time")]
    pub time: f64,
    #[serde(rename = "SurvivalProbability")]
    pub survival_probability: f64,
}

/// curve points grouped by employee, times increasing within each group
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SurvivalCurveTable {
    points: Vec<SurvivalCurvePoint>,
}

impl SurvivalCurveTable {
    pub fn points(&self) -> &[SurvivalCurvePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// employees in output order, each once
    pub fn employees(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = Vec::new();
        for point in &self.points {
            if ids.last() != Some(&point.employee_number) {
                ids.push(point.employee_number);
            }
        }
        ids
    }

    pub fn curve_for(&self, employee_number: i64) -> impl Iterator<Item = &SurvivalCurvePoint> + '_ {
        self.points.iter().filter(move |p| p.employee_number == employee_number)
    }

    /// `EmployeeNumber,Time,SurvivalProbability` rows
    pub fn to_csv_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        for point in &self.points {
            writer.serialize(point)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// turns per-employee step functions into a flat curve table
#[derive(Debug, Clone, Copy)]
pub struct SurvivalCurveExtractor<'a, M = SurvivalModel> {
    pipeline: &'a TrainedPipeline<M>,
}

impl<'a, M: SurvivalEstimator> SurvivalCurveExtractor<'a, M> {
    pub fn new(pipeline: &'a TrainedPipeline<M>) -> Self {
        Self { pipeline }
    }

    /// curves for the `num_samples` riskiest employees
    ///
    /// Returns the selected rows alongside the curve table. Asking for more rows
    /// than exist selects them all.
    pub fn extract(
        &self,
        scored: &RiskScoreTable,
        num_samples: usize,
    ) -> Result<(RiskScoreTable, SurvivalCurveTable)> {
        if num_samples == 0 {
            return Err(AttritionError::validation("num_samples", num_samples));
        }
        if scored.is_empty() {
            return Err(AttritionError::data("empty risk table received"));
        }

        let selected = scored.head(num_samples)?;
        let ids = selected.identifiers()?;
        let features = selected.table().without_columns(&[PREDICTED_RISK]);
        let functions = self.pipeline.predict_survival_function(&features)?;
        if functions.len() != ids.len() {
            return Err(AttritionError::training_failure(format!(
                "{} survival functions for {} employees",
                functions.len(),
                ids.len()
            )));
        }

        let points = ids
            .iter()
            .zip(&functions)
            .flat_map(|(&id, function)| {
                function.knots().map(move |(time, survival_probability)| SurvivalCurvePoint {
                    employee_number: id,
                    time,
                    survival_probability,
                })
            })
            .collect();
        info!("extracted survival curves for {} employees", ids.len());

        Ok((selected, SurvivalCurveTable { points }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SurvivalTarget;
    use crate::pipeline::TrainingPipeline;
    use crate::preprocessing::FeaturePreprocessor;
    use crate::scoring::RiskScorer;
    use crate::table::{EmployeeTable, NamedColumn, IDENTIFIER};

    fn scored() -> (TrainedPipeline, RiskScoreTable) {
        let n = 30;
        let level: Vec<f64> = (0..n).map(|i| (i % 5) as f64).collect();
        let times: Vec<f64> = (0..n).map(|i| 1.0 + level[i] * 2.0 + (i % 3) as f64).collect();
        let events: Vec<bool> = (0..n).map(|i| i % 4 != 0).collect();

        let table = EmployeeTable::new(vec![
            NamedColumn::numeric(IDENTIFIER, (0..n).map(|i| i as f64).collect()),
            NamedColumn::numeric("JobLevel", level),
        ])
        .unwrap();
        let target = SurvivalTarget::new(events, times).unwrap();

        let preprocessor = FeaturePreprocessor::new(["JobLevel"], Vec::<String>::new()).with_dropped([IDENTIFIER]);
        let pipeline = TrainingPipeline::new(preprocessor, SurvivalModel::new().with_n_estimators(15))
            .fit(&table, &target)
            .unwrap()
            .into_pipeline();
        let scores = RiskScorer::new(&pipeline).score(&table).unwrap();
        (pipeline, scores)
    }

    #[test]
    fn test_extract_top_rows() {
        let (pipeline, scores) = scored();
        let (selected, curves) = SurvivalCurveExtractor::new(&pipeline).extract(&scores, 4).unwrap();

        assert_eq!(selected.n_rows(), 4);
        assert_eq!(selected.identifiers().unwrap(), scores.identifiers().unwrap()[..4].to_vec());
        assert_eq!(curves.employees(), selected.identifiers().unwrap());

        let knots = pipeline.model().unique_times().unwrap().len();
        assert_eq!(curves.len(), 4 * knots);
    }

    #[test]
    fn test_curves_are_monotone_probabilities() {
        let (pipeline, scores) = scored();
        let (selected, curves) = SurvivalCurveExtractor::new(&pipeline).extract(&scores, 10).unwrap();

        for id in selected.identifiers().unwrap() {
            let curve: Vec<&SurvivalCurvePoint> = curves.curve_for(id).collect();
            assert!(!curve.is_empty());
            assert!(curve[0].survival_probability <= 1.0);
            for pair in curve.windows(2) {
                assert!(pair[0].time < pair[1].time);
                assert!(pair[0].survival_probability >= pair[1].survival_probability);
            }
            for point in curve {
                assert!((0.0..=1.0).contains(&point.survival_probability));
            }
        }
    }

    #[test]
    fn test_extract_clamps_sample_count() {
        let (pipeline, scores) = scored();
        let (selected, curves) = SurvivalCurveExtractor::new(&pipeline).extract(&scores, 1_000).unwrap();
        assert_eq!(selected.n_rows(), scores.n_rows());
        assert_eq!(curves.employees().len(), scores.n_rows());
    }

    #[test]
    fn test_extract_zero_samples() {
        let (pipeline, scores) = scored();
        let err = SurvivalCurveExtractor::new(&pipeline).extract(&scores, 0).unwrap_err();
        assert!(matches!(err, AttritionError::Validation { .. }));
    }

    #[test]
    fn test_curve_csv() {
        let (pipeline, scores) = scored();
        let (_, curves) = SurvivalCurveExtractor::new(&pipeline).extract(&scores, 1).unwrap();

        let mut buf = Vec::new();
        curves.to_csv_writer(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("EmployeeNumber,Time,SurvivalProbability\n"));
        assert_eq!(text.lines().count(), curves.len() + 1);
    }
}
