use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{AttritionError, Result};

/// row indices of a train/validation partition
#[derive(Debug, Clone, PartialEq)]
pub struct TrainValidationSplit {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// shuffle `n_rows` with a fixed seed and hold out `ceil(n_rows * validation_fraction)` of them
///
/// Plain random sampling, no stratification on the event flag.
pub fn train_validation_split(
    n_rows: usize,
    validation_fraction: f64,
    seed: u64,
) -> Result<TrainValidationSplit> {
    if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
        return Err(AttritionError::validation("validation_split", validation_fraction));
    }

    let n_validation = (n_rows as f64 * validation_fraction).ceil() as usize;
    if n_validation == 0 || n_validation >= n_rows {
        return Err(AttritionError::validation(
            "validation_split",
            format!("{} leaves an empty partition for {} rows", validation_fraction, n_rows),
        ));
    }

    let mut rows: Vec<usize> = (0..n_rows).collect();
    rows.shuffle(&mut StdRng::seed_from_u64(seed));

    let validation = rows.split_off(n_rows - n_validation);
    Ok(TrainValidationSplit { train: rows, validation })
}
