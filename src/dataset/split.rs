//! Dataset split strategies
//!
//! Both strategies shuffle sample indices with a seeded `ChaCha8Rng`, so the
//! same seed always yields the same partition.
//!
//! - `hold_out`: a single train/validation split
//! - `k_fold`: `k` disjoint validation folds covering every sample, fold sizes
//!   differing by at most one

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::ValidationStrategy;
use crate::utils::error::{FloraError, Result};

/// Train/validation indices for one fold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldSplit {
    /// Zero-based fold number
    pub fold: usize,
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
}

fn shuffled_indices(n: usize, seed: u64) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut rng);
    indices
}

/// Hold out `fraction` of `n` samples for validation
pub fn hold_out(n: usize, fraction: f64, seed: u64) -> Result<FoldSplit> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(FloraError::Config(format!(
            "validation fraction {} must be in (0, 1)",
            fraction
        )));
    }

    let valid_len = ((n as f64) * fraction).round() as usize;
    if valid_len == 0 || valid_len >= n {
        return Err(FloraError::Dataset(format!(
            "{} samples cannot be split with validation fraction {}",
            n, fraction
        )));
    }

    let indices = shuffled_indices(n, seed);
    let (valid, train) = indices.split_at(valid_len);

    Ok(FoldSplit {
        fold: 0,
        train: train.to_vec(),
        valid: valid.to_vec(),
    })
}

/// Partition `n` samples into `folds` disjoint validation folds
pub fn k_fold(n: usize, folds: usize, seed: u64) -> Result<Vec<FoldSplit>> {
    if folds < 2 {
        return Err(FloraError::Config(format!(
            "k-fold validation needs at least 2 folds, got {}",
            folds
        )));
    }
    if n < folds {
        return Err(FloraError::Dataset(format!(
            "{} samples cannot be split into {} folds",
            n, folds
        )));
    }

    let indices = shuffled_indices(n, seed);

    // The first n % folds folds take one extra sample
    let base = n / folds;
    let extra = n % folds;

    let mut splits = Vec::with_capacity(folds);
    let mut start = 0;
    for fold in 0..folds {
        let size = base + usize::from(fold < extra);
        let end = start + size;

        let valid = indices[start..end].to_vec();
        let train = indices[..start]
            .iter()
            .chain(indices[end..].iter())
            .copied()
            .collect();

        splits.push(FoldSplit { fold, train, valid });
        start = end;
    }

    Ok(splits)
}

/// Build the splits a validation strategy asks for
pub fn make_splits(n: usize, strategy: ValidationStrategy, seed: u64) -> Result<Vec<FoldSplit>> {
    match strategy {
        ValidationStrategy::HoldOut { fraction } => Ok(vec![hold_out(n, fraction, seed)?]),
        ValidationStrategy::KFold { folds } => k_fold(n, folds, seed),
    }
}
