use std::fmt;

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::{
    data::SurvivalTarget,
    error::{AttritionError, Result},
};

/// risk scores closer than this count as tied
pub const TIED_RISK_TOLERANCE: f64 = 1e-8;

/// censored concordance and the pair counts behind it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Concordance {
    pub c_index: f64,
    pub concordant: u64,
    pub discordant: u64,
    pub tied_risk: u64,
    pub tied_time: u64, // event/censored pairs sharing a time
}

impl Concordance {
    pub fn comparable_pairs(&self) -> u64 {
        self.concordant + self.discordant + self.tied_risk
    }
}

impl fmt::Display for Concordance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "c-index {:.4} ({} concordant, {} discordant, {} tied risk, {} tied time)",
            self.c_index, self.concordant, self.discordant, self.tied_risk, self.tied_time
        )
    }
}

/// concordance index for right-censored data - how often does higher risk mean leaving sooner?
///
/// A pair (i, j) is comparable when i left and either `t_i < t_j`, or the times
/// are equal and j is censored. Tied risk scores count half.
pub fn concordance_index_censored(
    events: &[bool],
    times: ArrayView1<f64>,
    risk_scores: ArrayView1<f64>,
) -> Result<Concordance> {
    let n = events.len();
    if times.len() != n || risk_scores.len() != n {
        return Err(AttritionError::data(format!(
            "events ({}), times ({}) and risk scores ({}) must have the same length",
            n,
            times.len(),
            risk_scores.len()
        )));
    }
    if risk_scores.iter().any(|r| !r.is_finite()) {
        return Err(AttritionError::data("risk scores must be finite"));
    }
    if !events.iter().any(|&e| e) {
        return Err(AttritionError::metric_undefined(
            "all samples are censored - concordance needs at least one event",
        ));
    }

    let mut concordant = 0u64;
    let mut discordant = 0u64;
    let mut tied_risk = 0u64;
    let mut tied_time = 0u64;

    for i in 0..n {
        if !events[i] {
            continue; // censored rows only ever sit on the "lived longer" side
        }

        for j in 0..n {
            if i == j {
                continue;
            }

            let comparable = if times[j] > times[i] {
                true
            } else if times[j] == times[i] && !events[j] {
                tied_time += 1;
                true
            } else {
                false
            };
            if !comparable {
                continue;
            }

            let diff = risk_scores[i] - risk_scores[j];
            if diff.abs() <= TIED_RISK_TOLERANCE {
                tied_risk += 1;
            } else if diff > 0.0 {
                concordant += 1;
            } else {
                discordant += 1;
            }
        }
    }

    let comparable = concordant + discordant + tied_risk;
    if comparable == 0 {
        return Err(AttritionError::metric_undefined("no comparable pairs for concordance"));
    }

    Ok(Concordance {
        c_index: (concordant as f64 + 0.5 * tied_risk as f64) / comparable as f64,
        concordant,
        discordant,
        tied_risk,
        tied_time,
    })
}

/// Cox log partial likelihood with Breslow ties
pub fn log_partial_likelihood(target: &SurvivalTarget, risk_scores: ArrayView1<f64>) -> Result<f64> {
    if risk_scores.len() != target.n_samples() {
        return Err(AttritionError::data(format!(
            "risk scores len ({}) != samples ({})",
            risk_scores.len(),
            target.n_samples()
        )));
    }
    if target.is_empty() {
        return Ok(0.0);
    }

    // shift by the max score so exp() stays finite
    let shift = risk_scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let weights = risk_scores.mapv(|s| (s - shift).exp());
    let events = target.events();
    let order = target.time_order();

    let mut loglik = 0.0;
    for set in target.risk_sets(weights.view()) {
        if set.n_events == 0 {
            continue;
        }
        let log_risk_set = shift + set.at_risk.ln();
        for &i in &order[set.members] {
            if events[i] {
                loglik += risk_scores[i] - log_risk_set;
            }
        }
    }

    Ok(loglik)
}
