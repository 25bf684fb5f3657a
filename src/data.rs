use std::ops::Range;

use ndarray::{Array1, ArrayView1};
use crate::error::{AttritionError, Result};

/// everyone still employed at one distinct time
#[derive(Debug, Clone, PartialEq)]
pub struct RiskSet {
    pub time: f64,
    pub members: Range<usize>, // positions in `time_order` sharing `time`
    pub n_events: usize,
    pub at_risk: f64,          // weight summed over rows with t >= `time`
}

/// structured survival target - one (event, time) pair per employee
#[derive(Debug, Clone)]
pub struct SurvivalTarget {
    times: Array1<f64>,   // years at company (event or censoring time)
    events: Vec<bool>,    // true = left the company, false = still employed (censored)
    time_order: Vec<usize>, // row indices sorted by time, precomputed for the loss
}

impl SurvivalTarget {
    /// build a target from raw event flags and times
    pub fn new(events: Vec<bool>, times: Vec<f64>) -> Result<Self> {
        if events.len() != times.len() {
            return Err(AttritionError::data(format!(
                "event len ({}) != time len ({})",
                events.len(),
                times.len()
            )));
        }

        if let Some(bad) = times.iter().find(|t| !t.is_finite() || **t < 0.0) {
            return Err(AttritionError::data(format!(
                "survival times must be finite & >= 0, got {}",
                bad
            )));
        }

        let mut time_order: Vec<usize> = (0..times.len()).collect();
        time_order.sort_by(|&a, &b| times[a].total_cmp(&times[b]));

        Ok(Self {
            times: Array1::from(times),
            events,
            time_order,
        })
    }

    /// how many employees
    pub fn n_samples(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// how many observed departures
    pub fn n_events(&self) -> usize {
        self.events.iter().filter(|&&e| e).count()
    }

    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    pub fn events(&self) -> &[bool] {
        &self.events
    }

    /// row indices ordered by ascending time (ties keep row order)
    pub fn time_order(&self) -> &[usize] {
        &self.time_order
    }

    /// distinct times at which somebody actually left, ascending
    pub fn event_times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self
            .time_order
            .iter()
            .filter(|&&i| self.events[i])
            .map(|&i| self.times[i])
            .collect();
        times.dedup();
        times
    }

    /// distinct observed times (events and censorings), ascending
    pub fn unique_times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self.time_order.iter().map(|&i| self.times[i]).collect();
        times.dedup();
        times
    }

    /// largest observed time, None when empty
    pub fn max_time(&self) -> Option<f64> {
        self.time_order.last().map(|&i| self.times[i])
    }

    /// risk sets at every distinct time, ascending
    ///
    /// `weights` is indexed by row. `at_risk` accumulates from the latest time
    /// down and is never formed by subtracting from a total.
    pub fn risk_sets(&self, weights: ArrayView1<f64>) -> Vec<RiskSet> {
        let order = &self.time_order;
        let mut sets = Vec::new();

        let mut start = 0;
        while start < order.len() {
            let time = self.times[order[start]];
            let end = start + order[start..].iter().take_while(|&&i| self.times[i] == time).count();
            let n_events = order[start..end].iter().filter(|&&i| self.events[i]).count();
            sets.push(RiskSet { time, members: start..end, n_events, at_risk: 0.0 });
            start = end;
        }

        let mut at_risk = 0.0;
        for set in sets.iter_mut().rev() {
            at_risk += order[set.members.clone()].iter().map(|&i| weights[i]).sum::<f64>();
            set.at_risk = at_risk;
        }
        sets
    }

    /// grab a subset of employees by row index
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        if indices.iter().any(|&i| i >= self.n_samples()) {
            return Err(AttritionError::data("subset index out of bounds"));
        }

        let events = indices.iter().map(|&i| self.events[i]).collect();
        let times = indices.iter().map(|&i| self.times[i]).collect();

        Self::new(events, times)
    }

    /// fitting needs at least two distinct event times to order anybody
    pub fn check_fittable(&self) -> Result<()> {
        let n_event_times = self.event_times().len();
        if n_event_times < 2 {
            return Err(AttritionError::data(format!(
                "need at least 2 distinct event times to fit, got {} ({} events among {} employees)",
                n_event_times,
                self.n_events(),
                self.n_samples()
            )));
        }
        Ok(())
    }
}
