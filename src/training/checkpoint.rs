//! Best-model checkpointing and early stopping
//!
//! `CheckpointState` only changes at validation-epoch boundaries. A strictly
//! better average F1 resets patience and overwrites the single best-model file;
//! anything else spends one unit of patience.

use std::path::{Path, PathBuf};

use burn::{module::Module, record::CompactRecorder, tensor::backend::Backend};
use serde::{Deserialize, Serialize};

use crate::model::{DualHeadClassifier, DualHeadClassifierConfig};
use crate::utils::error::{FloraError, Result};

/// What one validation epoch did to the checkpoint state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CheckpointDecision {
    /// New best; the snapshot must be written
    Improved { previous: f64, current: f64 },
    /// No improvement; `patience` epochs since the last one
    NoImprovement { patience: usize },
}

/// Best F1 so far and the patience counter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub best_f1: f64,
    pub best_epoch: Option<usize>,
    pub patience_counter: usize,
    pub patience_limit: usize,
}

impl CheckpointState {
    pub fn new(patience_limit: usize) -> Self {
        Self {
            best_f1: 0.0,
            best_epoch: None,
            patience_counter: 0,
            patience_limit,
        }
    }

    /// Record the average F1 of validation epoch `epoch`
    pub fn observe(&mut self, epoch: usize, avg_f1: f64) -> CheckpointDecision {
        if avg_f1 > self.best_f1 {
            let previous = self.best_f1;
            self.best_f1 = avg_f1;
            self.best_epoch = Some(epoch);
            self.patience_counter = 0;
            CheckpointDecision::Improved {
                previous,
                current: avg_f1,
            }
        } else {
            self.patience_counter += 1;
            CheckpointDecision::NoImprovement {
                patience: self.patience_counter,
            }
        }
    }

    pub fn should_stop(&self) -> bool {
        self.patience_counter >= self.patience_limit
    }
}

/// Write model parameters (no optimizer state), replacing any previous file
///
/// `path` is given without extension; the recorder appends `.mpk`.
pub fn save_model<B: Backend>(model: &DualHeadClassifier<B>, path: &Path) -> Result<PathBuf> {
    let recorder = CompactRecorder::new();
    model
        .clone()
        .save_file(path.to_path_buf(), &recorder)
        .map_err(|e| FloraError::Model(format!("Failed to save model to {:?}: {:?}", path, e)))?;
    Ok(path.with_extension("mpk"))
}

/// Load a model saved with [`save_model`]
pub fn load_model<B: Backend>(
    config: &DualHeadClassifierConfig,
    path: &Path,
    device: &B::Device,
) -> Result<DualHeadClassifier<B>> {
    let recorder = CompactRecorder::new();
    config
        .init::<B>(device)
        .load_file(path.to_path_buf(), &recorder, device)
        .map_err(|e| FloraError::Model(format!("Failed to load model from {:?}: {:?}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_strict_improvement_only() {
        let mut state = CheckpointState::new(10);
        assert!(matches!(state.observe(0, 0.5), CheckpointDecision::Improved { .. }));
        assert_eq!(
            state.observe(1, 0.5),
            CheckpointDecision::NoImprovement { patience: 1 }
        );
        assert!(matches!(state.observe(2, 0.6), CheckpointDecision::Improved { .. }));
        assert_eq!(state.patience_counter, 0);
        assert_eq!(state.best_epoch, Some(2));
    }

    #[test]
    fn test_stops_ten_epochs_after_last_improvement() {
        let mut state = CheckpointState::new(10);
        let f1s = [0.4, 0.3, 0.2, 0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];

        let mut stop_epoch = None;
        for (epoch, &f1) in f1s.iter().enumerate() {
            state.observe(epoch, f1);
            if state.should_stop() {
                stop_epoch = Some(epoch);
                break;
            }
        }
        assert_eq!(stop_epoch, Some(10));
    }

    #[test]
    fn test_zero_f1_never_improves() {
        let mut state = CheckpointState::new(10);
        let mut epochs_run = 0;
        for epoch in 0..50 {
            epochs_run += 1;
            state.observe(epoch, 0.0);
            if state.should_stop() {
                break;
            }
        }
        assert_eq!(epochs_run, 10);
        assert_eq!(state.best_epoch, None);
    }

    #[test]
    fn test_save_overwrites_and_loads() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best_model");
        let config = DualHeadClassifierConfig::new().with_base_filters(2);

        let first: DualHeadClassifier<TestBackend> = config.init(&device);
        let second: DualHeadClassifier<TestBackend> = config.init(&device);

        save_model(&first, &path).unwrap();
        let written = save_model(&second, &path).unwrap();
        assert!(written.exists());

        let loaded: DualHeadClassifier<TestBackend> = load_model(&config, &path, &device).unwrap();
        let images = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);

        let expected: Vec<f32> = second
            .eval_mode()
            .forward(images.clone())
            .0
            .into_data()
            .iter::<f32>()
            .collect();
        let actual: Vec<f32> = loaded
            .eval_mode()
            .forward(images)
            .0
            .into_data()
            .iter::<f32>()
            .collect();

        for (a, e) in actual.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-2, "{} vs {}", a, e);
        }
    }
}
