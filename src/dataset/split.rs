//! Deterministic train/validation split
//!
//! Records are shuffled with a seeded ChaCha8 generator, then the trailing
//! `validation_fraction` of them (rounded down) becomes the validation set.
//! The same seed always gives the same split.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::LabeledImageRecord;
use crate::utils::error::{AgronomicareError, Result};
use crate::RSEED;

/// Default fraction of records held out for validation
pub const VALIDATION_FRACTION: f64 = 0.2;

/// The two halves of a split; together they hold every record exactly once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainValSplit {
    pub train: Vec<LabeledImageRecord>,
    pub validation: Vec<LabeledImageRecord>,
    pub seed: u64,
}

impl TrainValSplit {
    /// Split `records` with the given validation fraction and seed
    pub fn new(
        records: &[LabeledImageRecord],
        validation_fraction: f64,
        seed: u64,
    ) -> Result<Self> {
        if !(0.0..1.0).contains(&validation_fraction) {
            return Err(AgronomicareError::Config(format!(
                "validation fraction must be in [0, 1), got {}",
                validation_fraction
            )));
        }

        let mut shuffled = records.to_vec();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        shuffled.shuffle(&mut rng);

        let num_val = (validation_fraction * shuffled.len() as f64).floor() as usize;
        let validation = shuffled.split_off(shuffled.len() - num_val);

        info!(
            "Split {} records: {} train, {} validation (seed {})",
            records.len(),
            shuffled.len(),
            validation.len(),
            seed
        );

        Ok(Self {
            train: shuffled,
            validation,
            seed,
        })
    }

    /// The 80/20 split with seed 42
    pub fn standard(records: &[LabeledImageRecord]) -> Result<Self> {
        Self::new(records, VALIDATION_FRACTION, RSEED)
    }
}
