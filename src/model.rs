use log::{debug, info};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::{
    data::SurvivalTarget,
    error::{AttritionError, Result},
    metrics::log_partial_likelihood,
    reshape::FeatureFrame,
    tree::{RegressionTree, TreeParams},
};

/// anything that can sit at the end of the pipeline: fit on a named frame,
/// score risk, and produce survival step functions
pub trait SurvivalEstimator {
    fn fit_frame(&mut self, features: &FeatureFrame, target: &SurvivalTarget) -> Result<()>;

    /// relative risk per row, higher = leaves sooner
    fn predict_risk(&self, features: &FeatureFrame) -> Result<Array1<f64>>;

    fn survival_functions(&self, features: &FeatureFrame) -> Result<Vec<SurvivalFunction>>;

    /// importance per feature, aligned with the frame the estimator was fitted on
    fn importances(&self) -> Result<Array1<f64>>;

    /// same hyper-parameters, nothing learned
    fn unfitted(&self) -> Self
    where
        Self: Sized;
}

/// survival step function S(t) for one employee
///
/// Knots sit at every distinct time seen in training. Before the first knot
/// S(t) = 1; past the last knot the curve stays flat at its last value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurvivalFunction {
    times: Vec<f64>,
    probabilities: Vec<f64>,
}

impl SurvivalFunction {
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// (time, probability) knots in increasing time
    pub fn knots(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.times.iter().copied().zip(self.probabilities.iter().copied())
    }

    /// probability of still being employed at `time`
    pub fn evaluate(&self, time: f64) -> f64 {
        let passed = self.times.partition_point(|&t| t <= time);
        if passed == 0 { 1.0 } else { self.probabilities[passed - 1] }
    }
}

/// Breslow cumulative baseline hazard over the training times
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BaselineHazard {
    times: Vec<f64>,
    cumulative: Vec<f64>, // in units of exp(-shift)
    shift: f64,           // max training score
}

impl BaselineHazard {
    fn fit(target: &SurvivalTarget, scores: ArrayView1<f64>) -> Self {
        let shift = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights = scores.mapv(|s| (s - shift).exp());

        let mut knots = Vec::new();
        let mut cumulative = Vec::new();
        let mut hazard = 0.0;

        for set in target.risk_sets(weights.view()) {
            if set.n_events > 0 && set.at_risk > 0.0 {
                hazard += set.n_events as f64 / set.at_risk;
            }
            knots.push(set.time);
            cumulative.push(hazard);
        }

        Self { times: knots, cumulative, shift }
    }

    fn survival_function(&self, score: f64) -> SurvivalFunction {
        let relative = (score - self.shift).exp();
        let probabilities = self
            .cumulative
            .iter()
            .map(|h| (-h * relative).exp().clamp(0.0, 1.0))
            .collect();
        SurvivalFunction { times: self.times.clone(), probabilities }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedEnsemble {
    feature_names: Vec<String>,
    trees: Vec<RegressionTree>,
    baseline: BaselineHazard,
    train_loss: Vec<f64>, // mean negative log partial likelihood after each stage
}

/// gradient-boosted survival model w/ Cox partial likelihood loss
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurvivalModel {
    n_estimators: usize,
    learning_rate: f64,
    tree_params: TreeParams,
    subsample: f64,
    random_state: u64,
    fitted: Option<FittedEnsemble>,
}

impl Default for SurvivalModel {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            tree_params: TreeParams::default(),
            subsample: 1.0,
            random_state: 0,
            fitted: None,
        }
    }
}

impl SurvivalModel {
    /// new model w/ defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// number of boosting stages
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    /// shrinkage applied to every tree
    pub fn with_learning_rate(mut self, rate: f64) -> Self {
        self.learning_rate = rate;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.tree_params.max_depth = depth;
        self
    }

    pub fn with_min_samples_split(mut self, n: usize) -> Self {
        self.tree_params.min_samples_split = n;
        self
    }

    pub fn with_min_samples_leaf(mut self, n: usize) -> Self {
        self.tree_params.min_samples_leaf = n;
        self
    }

    /// fraction of rows each tree sees, 1.0 = all of them
    pub fn with_subsample(mut self, fraction: f64) -> Self {
        self.subsample = fraction;
        self
    }

    /// seed for row subsampling
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn n_estimators(&self) -> usize {
        self.n_estimators
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn check_params(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(AttritionError::validation("n_estimators", self.n_estimators));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(AttritionError::validation("learning_rate", self.learning_rate));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(AttritionError::validation("subsample", self.subsample));
        }
        if self.tree_params.min_samples_split < 2 {
            return Err(AttritionError::validation("min_samples_split", self.tree_params.min_samples_split));
        }
        if self.tree_params.min_samples_leaf == 0 {
            return Err(AttritionError::validation("min_samples_leaf", self.tree_params.min_samples_leaf));
        }
        Ok(())
    }

    /// fit the ensemble - this does the actual work
    pub fn fit(&mut self, features: &FeatureFrame, target: &SurvivalTarget) -> Result<&mut Self> {
        self.check_params()?;

        let n = features.n_samples();
        if n != target.n_samples() {
            return Err(AttritionError::data(format!(
                "feature rows ({}) != target rows ({})",
                n,
                target.n_samples()
            )));
        }
        target.check_fittable()?;
        if features.values().iter().any(|v| !v.is_finite()) {
            return Err(AttritionError::data("features contain non-finite values"));
        }

        let x = features.values();
        let mut scores = Array1::<f64>::zeros(n);
        let mut rng = StdRng::seed_from_u64(self.random_state);
        let mut trees = Vec::with_capacity(self.n_estimators);
        let mut train_loss = Vec::with_capacity(self.n_estimators);
        let mut all_rows: Vec<usize> = (0..n).collect();

        for stage in 0..self.n_estimators {
            let gradient = cox_negative_gradient(target, scores.view());
            if gradient.iter().any(|g| !g.is_finite()) {
                return Err(AttritionError::training_failure(format!(
                    "non-finite gradient at stage {}",
                    stage
                )));
            }

            let rows = self.sample_rows(&mut all_rows, &mut rng);
            let tree = RegressionTree::fit(x, gradient.view(), &rows, &self.tree_params)?;
            scores.scaled_add(self.learning_rate, &tree.predict(x));

            if scores.iter().any(|s| !s.is_finite()) {
                return Err(AttritionError::training_failure(format!(
                    "risk scores overflowed at stage {}",
                    stage
                )));
            }

            let loss = -log_partial_likelihood(target, scores.view())? / n as f64;
            if !loss.is_finite() {
                return Err(AttritionError::training_failure(format!(
                    "partial likelihood diverged at stage {}",
                    stage
                )));
            }
            debug!("stage {:>4}: loss {:.6}, {} leaves", stage, loss, tree.n_leaves());
            train_loss.push(loss);
            trees.push(tree);
        }

        info!(
            "boosted {} trees on {} employees ({} events), final loss {:.6}",
            trees.len(),
            n,
            target.n_events(),
            train_loss.last().copied().unwrap_or(f64::NAN)
        );

        self.fitted = Some(FittedEnsemble {
            feature_names: features.names().to_vec(),
            trees,
            baseline: BaselineHazard::fit(target, scores.view()),
            train_loss,
        });
        Ok(self)
    }

    fn sample_rows(&self, all_rows: &mut [usize], rng: &mut StdRng) -> Vec<usize> {
        if self.subsample >= 1.0 {
            return all_rows.to_vec();
        }
        let take = ((all_rows.len() as f64 * self.subsample).round() as usize).clamp(1, all_rows.len());
        all_rows.sort_unstable();
        all_rows.shuffle(rng);
        let mut rows = all_rows[..take].to_vec();
        rows.sort_unstable();
        rows
    }

    fn fitted(&self) -> Result<&FittedEnsemble> {
        self.fitted.as_ref().ok_or_else(|| AttritionError::not_fitted("survival model"))
    }

    fn checked_values<'a>(&self, features: &'a FeatureFrame) -> Result<ArrayView2<'a, f64>> {
        let fitted = self.fitted()?;
        if features.names() != fitted.feature_names.as_slice() {
            return Err(AttritionError::data(format!(
                "feature mismatch: model expects {} named features, got {}",
                fitted.feature_names.len(),
                features.n_features()
            )));
        }
        Ok(features.values())
    }

    /// risk scores for new employees - only the ordering means anything
    pub fn predict(&self, features: &FeatureFrame) -> Result<Array1<f64>> {
        let x = self.checked_values(features)?;
        let fitted = self.fitted()?;

        let mut scores = Array1::<f64>::zeros(x.nrows());
        for tree in &fitted.trees {
            scores.scaled_add(self.learning_rate, &tree.predict(x));
        }
        Ok(scores)
    }

    /// one survival step function per row
    pub fn predict_survival_function(&self, features: &FeatureFrame) -> Result<Vec<SurvivalFunction>> {
        let scores = self.predict(features)?;
        let baseline = &self.fitted()?.baseline;
        Ok(scores.iter().map(|&s| baseline.survival_function(s)).collect())
    }

    /// impurity importance, normalized per tree then averaged (sums to 1)
    pub fn feature_importances(&self) -> Result<Array1<f64>> {
        let fitted = self.fitted()?;
        let mut total = Array1::<f64>::zeros(fitted.feature_names.len());

        for tree in &fitted.trees {
            let raw = ArrayView1::from(tree.importances());
            let sum = raw.sum();
            if sum > 0.0 {
                total.scaled_add(1.0 / sum, &raw);
            }
        }

        let sum = total.sum();
        if sum > 0.0 {
            total /= sum;
        }
        Ok(total)
    }

    /// names of the features the model was fitted on
    pub fn feature_names(&self) -> Result<&[String]> {
        Ok(&self.fitted()?.feature_names)
    }

    /// training loss after each boosting stage
    pub fn train_loss(&self) -> Result<&[f64]> {
        Ok(&self.fitted()?.train_loss)
    }

    /// distinct training times the survival functions are defined on
    pub fn unique_times(&self) -> Result<&[f64]> {
        Ok(&self.fitted()?.baseline.times)
    }
}

impl SurvivalEstimator for SurvivalModel {
    fn fit_frame(&mut self, features: &FeatureFrame, target: &SurvivalTarget) -> Result<()> {
        self.fit(features, target).map(|_| ())
    }

    fn predict_risk(&self, features: &FeatureFrame) -> Result<Array1<f64>> {
        self.predict(features)
    }

    fn survival_functions(&self, features: &FeatureFrame) -> Result<Vec<SurvivalFunction>> {
        self.predict_survival_function(features)
    }

    fn importances(&self) -> Result<Array1<f64>> {
        self.feature_importances()
    }

    fn unfitted(&self) -> Self {
        Self { fitted: None, ..self.clone() }
    }
}

/// negative gradient of the Cox loss:
/// `δ_i - exp(η_i) * Σ_{event j, t_j <= t_i} 1 / Σ_{t_k >= t_j} exp(η_k)`
fn cox_negative_gradient(target: &SurvivalTarget, scores: ArrayView1<f64>) -> Array1<f64> {
    let events = target.events();
    let order = target.time_order();
    let shift = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let weights = scores.mapv(|s| (s - shift).exp());

    let mut gradient = Array1::<f64>::zeros(scores.len());
    let mut cumulative = 0.0;

    for set in target.risk_sets(weights.view()) {
        if set.n_events > 0 {
            cumulative += set.n_events as f64 / set.at_risk;
        }
        for &i in &order[set.members] {
            let event = if events[i] { 1.0 } else { 0.0 };
            gradient[i] = event - weights[i] * cumulative;
        }
    }

    gradient
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use rand::Rng;

    fn log_sum_exp(values: impl Iterator<Item = f64> + Clone) -> f64 {
        let m = values.clone().fold(f64::NEG_INFINITY, f64::max);
        m + values.map(|v| (v - m).exp()).sum::<f64>().ln()
    }

    /// gradient and loss straight from the definition, one risk set at a time
    fn reference_gradient(target: &SurvivalTarget, scores: &Array1<f64>) -> Array1<f64> {
        let (times, events) = (target.times(), target.events());
        let n = target.n_samples();
        let log_risk_set = |j: usize| log_sum_exp((0..n).filter(move |&k| times[k] >= times[j]).map(|k| scores[k]));

        Array1::from_iter((0..n).map(|i| {
            let compensator: f64 = (0..n)
                .filter(|&j| events[j] && times[j] <= times[i])
                .map(|j| (scores[i] - log_risk_set(j)).exp())
                .sum();
            if events[i] { 1.0 - compensator } else { -compensator }
        }))
    }

    fn reference_loss(target: &SurvivalTarget, scores: &Array1<f64>) -> f64 {
        let (times, events) = (target.times(), target.events());
        let n = target.n_samples();
        let loglik: f64 = (0..n)
            .filter(|&i| events[i])
            .map(|i| scores[i] - log_sum_exp((0..n).filter(|&k| times[k] >= times[i]).map(|k| scores[k])))
            .sum();
        -loglik / n as f64
    }

    fn create_test_frame() -> (FeatureFrame, SurvivalTarget) {
        // feature 0 drives early exits, feature 1 is noise
        let values = Array2::from_shape_vec((8, 2), vec![
            2.0, 0.1,
            1.5, -0.3,
            1.0, 0.7,
            0.5, 0.0,
            0.0, -0.4,
            -0.5, 0.2,
            -1.0, 0.9,
            -1.5, -0.8,
        ]).unwrap();
        let frame = FeatureFrame::new(vec!["x0".into(), "x1".into()], values).unwrap();
        let target = SurvivalTarget::new(
            vec![true, true, true, false, true, true, false, false],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        ).unwrap();
        (frame, target)
    }

    #[test]
    fn test_model_creation() {
        let model = SurvivalModel::new()
            .with_n_estimators(50)
            .with_learning_rate(0.05)
            .with_max_depth(2);

        assert_eq!(model.n_estimators(), 50);
        assert_eq!(model.learning_rate(), 0.05);
        assert_eq!(model.tree_params.max_depth, 2);
        assert!(!model.is_fitted());
    }

    #[test]
    fn test_gradient_at_zero_scores() {
        let target = SurvivalTarget::new(vec![true, false, true], vec![1.0, 2.0, 3.0]).unwrap();
        let gradient = cox_negative_gradient(&target, Array1::<f64>::zeros(3).view());

        // cumulative hazard: 1/3 at t=1, 1/3 at t=2, 1/3 + 1 at t=3
        assert_relative_eq!(gradient[0], 1.0 - 1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(gradient[1], -1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(gradient[2], 1.0 - 4.0 / 3.0, epsilon = 1e-12);
        // martingale residuals sum to zero
        assert_relative_eq!(gradient.sum(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_gradient_wide_score_spread() {
        // one departure at the last time scored far below everyone else
        let mut scores: Vec<f64> = (0..9).map(|k| 0.4 + 0.1 * k as f64).collect();
        scores.push(-40.0);
        let scores = Array1::from(scores);
        let times: Vec<f64> = (1..=10).map(f64::from).collect();
        let target = SurvivalTarget::new(vec![true; 10], times).unwrap();

        let gradient = cox_negative_gradient(&target, scores.view());
        let expected = reference_gradient(&target, &scores);

        assert!(gradient[9].abs() < 1e-9, "last-time gradient {}", gradient[9]);
        for (g, e) in gradient.iter().zip(expected.iter()) {
            assert_relative_eq!(*g, *e, epsilon = 1e-9);
        }
        assert_relative_eq!(gradient.sum(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_breslow_baseline_wide_score_spread() {
        let target = SurvivalTarget::new(vec![true, true, true], vec![1.0, 2.0, 3.0]).unwrap();
        let scores = Array1::from(vec![1.0, 0.5, -40.0]);
        let baseline = BaselineHazard::fit(&target, scores.view());

        // shifted by the max score, the last risk set weighs exp(-41)
        let last_step = baseline.cumulative[2] - baseline.cumulative[1];
        assert_relative_eq!(last_step, (41.0f64).exp(), max_relative = 1e-9);
        // H0 * exp(-41) at the last knot is 1 plus the small earlier hazard
        let curve = baseline.survival_function(-40.0);
        assert_relative_eq!(curve.probabilities()[2], (-1.0f64 - (-41.0f64).exp() * baseline.cumulative[1]).exp(), max_relative = 1e-9);
    }

    #[test]
    fn test_aggressive_learning_rate_is_accurate_or_fails() {
        let mut rng = StdRng::seed_from_u64(17);
        let n = 40;
        let values = Array2::from_shape_fn((n, 3), |_| rng.gen_range(-2.0f64..2.0));
        let times: Vec<f64> = (0..n)
            .map(|i| ((-values[[i, 0]]).exp() * rng.gen_range(0.5..1.5) * 5.0).round() + 1.0)
            .collect();
        let events: Vec<bool> = (0..n).map(|_| rng.gen_bool(0.7)).collect();
        let frame = FeatureFrame::new(vec!["x0".into(), "x1".into(), "x2".into()], values).unwrap();
        let target = SurvivalTarget::new(events, times).unwrap();

        let mut model = SurvivalModel::new()
            .with_learning_rate(1.0)
            .with_n_estimators(500)
            .with_max_depth(5);
        match model.fit(&frame, &target) {
            Ok(_) => {
                let scores = model.predict(&frame).unwrap();
                assert!(scores.iter().all(|s| s.is_finite()));

                let loss = model.train_loss().unwrap();
                let last = loss[loss.len() - 1];
                assert!(loss.iter().all(|l| l.is_finite() && *l >= 0.0));
                assert!(last <= loss[0]);
                assert_relative_eq!(last, reference_loss(&target, &scores), epsilon = 1e-6, max_relative = 1e-6);
            }
            Err(err) => assert!(matches!(err, AttritionError::TrainingFailure { .. }), "unexpected error: {}", err),
        }
    }

    #[test]
    fn test_fit_orders_risk() {
        let (frame, target) = create_test_frame();
        let mut model = SurvivalModel::new().with_n_estimators(30);
        model.fit(&frame, &target).unwrap();

        let risk = model.predict(&frame).unwrap();
        assert_eq!(risk.len(), 8);
        assert!(risk[0] > risk[7], "early leaver should score higher");

        let loss = model.train_loss().unwrap();
        assert_eq!(loss.len(), 30);
        assert!(loss[29] < loss[0]);
    }

    #[test]
    fn test_survival_functions_are_step_curves() {
        let (frame, target) = create_test_frame();
        let mut model = SurvivalModel::new().with_n_estimators(20);
        model.fit(&frame, &target).unwrap();

        let curves = model.predict_survival_function(&frame).unwrap();
        assert_eq!(curves.len(), 8);
        for curve in &curves {
            assert_eq!(curve.times(), model.unique_times().unwrap());
            assert!(curve.probabilities()[0] <= 1.0);
            for w in curve.probabilities().windows(2) {
                assert!(w[1] <= w[0]);
            }
            assert!(curve.probabilities().iter().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn test_evaluate_extrapolates_flat() {
        let curve = SurvivalFunction { times: vec![1.0, 2.0, 4.0], probabilities: vec![0.9, 0.7, 0.4] };
        assert_eq!(curve.evaluate(0.5), 1.0);
        assert_eq!(curve.evaluate(1.0), 0.9);
        assert_eq!(curve.evaluate(3.9), 0.7);
        assert_eq!(curve.evaluate(4.0), 0.4);
        assert_eq!(curve.evaluate(100.0), 0.4);
    }

    #[test]
    fn test_feature_importances() {
        let (frame, target) = create_test_frame();
        let mut model = SurvivalModel::new().with_n_estimators(10);
        model.fit(&frame, &target).unwrap();

        let importances = model.feature_importances().unwrap();
        assert_eq!(importances.len(), 2);
        assert!(importances.iter().all(|&v| v >= 0.0));
        assert_relative_eq!(importances.sum(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_all_censored_fails_with_data_error() {
        let values = Array2::from_shape_vec((3, 1), vec![1.0, 2.0, 3.0]).unwrap();
        let frame = FeatureFrame::new(vec!["x".into()], values).unwrap();
        let target = SurvivalTarget::new(vec![false; 3], vec![1.0, 2.0, 3.0]).unwrap();

        let err = SurvivalModel::new().fit(&frame, &target).unwrap_err();
        assert!(matches!(err, AttritionError::Data { .. }));
    }

    #[test]
    fn test_row_mismatch() {
        let (frame, _) = create_test_frame();
        let target = SurvivalTarget::new(vec![true, true], vec![1.0, 2.0]).unwrap();
        assert!(matches!(SurvivalModel::new().fit(&frame, &target), Err(AttritionError::Data { .. })));
    }

    #[test]
    fn test_bad_parameters() {
        let (frame, target) = create_test_frame();
        let err = SurvivalModel::new().with_learning_rate(0.0).fit(&frame, &target).unwrap_err();
        assert!(matches!(err, AttritionError::Validation { .. }));
        assert!(SurvivalModel::new().with_subsample(1.5).fit(&frame, &target).is_err());
        assert!(SurvivalModel::new().with_n_estimators(0).fit(&frame, &target).is_err());
    }

    #[test]
    fn test_model_not_fitted_error() {
        let (frame, _) = create_test_frame();
        let model = SurvivalModel::new();
        assert!(matches!(model.predict(&frame), Err(AttritionError::FitPrecondition { .. })));
        assert!(model.feature_importances().is_err());
        assert!(model.predict_survival_function(&frame).is_err());
    }

    #[test]
    fn test_prediction_feature_mismatch() {
        let (frame, target) = create_test_frame();
        let mut model = SurvivalModel::new().with_n_estimators(5);
        model.fit(&frame, &target).unwrap();

        let wrong = FeatureFrame::new(vec!["x0".into()], Array2::zeros((2, 1))).unwrap();
        assert!(matches!(model.predict(&wrong), Err(AttritionError::Data { .. })));
    }

    #[test]
    fn test_subsampling_is_seeded() {
        let (frame, target) = create_test_frame();
        let fit = |seed| {
            let mut model = SurvivalModel::new()
                .with_n_estimators(15)
                .with_subsample(0.75)
                .with_random_state(seed);
            model.fit(&frame, &target).unwrap();
            model.predict(&frame).unwrap()
        };
        assert_eq!(fit(3), fit(3));
    }
}
