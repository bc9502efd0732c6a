//! Per-pass metric accumulation
//!
//! One accumulator per pass (train, validation), reset at the start of every
//! epoch so the prediction vectors never outgrow a single epoch.

use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::utils::metrics::Metrics;

/// Argmax over the class dimension, as class ids
pub fn predicted_ids<B: Backend>(logits: Tensor<B, 2>) -> Vec<usize> {
    let [batch_size, _] = logits.dims();
    logits
        .argmax(1)
        .reshape([batch_size])
        .into_data()
        .iter::<i64>()
        .map(|id| id as usize)
        .collect()
}

/// Headline numbers of one pass over a dataset
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PassSummary {
    /// Mean of the per-batch losses
    pub loss: f64,
    pub species_acc: f64,
    pub color_acc: f64,
    pub species_f1: f64,
    pub color_f1: f64,
    /// Mean of the two head F1 scores
    pub avg_f1: f64,
    pub samples: usize,
}

/// Running totals for one pass
#[derive(Debug, Clone, Default)]
pub struct EpochAccumulator {
    loss_sum: f64,
    batches: usize,
    species_correct: usize,
    color_correct: usize,
    samples: usize,
    species_preds: Vec<usize>,
    species_labels: Vec<usize>,
    color_preds: Vec<usize>,
    color_labels: Vec<usize>,
}

impl EpochAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every total and prediction vector
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Add one batch worth of loss and predictions
    pub fn record_batch(
        &mut self,
        loss: f64,
        species_preds: &[usize],
        species_labels: &[usize],
        color_preds: &[usize],
        color_labels: &[usize],
    ) {
        self.loss_sum += loss;
        self.batches += 1;
        self.samples += species_labels.len();

        self.species_correct += count_matches(species_preds, species_labels);
        self.color_correct += count_matches(color_preds, color_labels);

        self.species_preds.extend_from_slice(species_preds);
        self.species_labels.extend_from_slice(species_labels);
        self.color_preds.extend_from_slice(color_preds);
        self.color_labels.extend_from_slice(color_labels);
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Mean batch loss, accuracies and macro F1 per head
    pub fn summary(&self, num_species: usize, num_colors: usize) -> PassSummary {
        let loss = if self.batches > 0 {
            self.loss_sum / self.batches as f64
        } else {
            0.0
        };

        let (species_acc, color_acc) = if self.samples > 0 {
            (
                self.species_correct as f64 / self.samples as f64,
                self.color_correct as f64 / self.samples as f64,
            )
        } else {
            (0.0, 0.0)
        };

        let species_f1 =
            Metrics::from_predictions(&self.species_preds, &self.species_labels, num_species)
                .macro_f1;
        let color_f1 =
            Metrics::from_predictions(&self.color_preds, &self.color_labels, num_colors).macro_f1;

        PassSummary {
            loss,
            species_acc,
            color_acc,
            species_f1,
            color_f1,
            avg_f1: (species_f1 + color_f1) / 2.0,
            samples: self.samples,
        }
    }
}

fn count_matches(preds: &[usize], labels: &[usize]) -> usize {
    preds.iter().zip(labels).filter(|(p, l)| p == l).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    #[test]
    fn test_all_correct_gives_unit_scores() {
        let mut acc = EpochAccumulator::new();
        acc.record_batch(0.5, &[0, 3, 15], &[0, 3, 15], &[1, 7, 2], &[1, 7, 2]);
        acc.record_batch(0.3, &[4, 4], &[4, 4], &[0, 0], &[0, 0]);

        let summary = acc.summary(16, 8);
        assert_eq!(summary.species_acc, 1.0);
        assert_eq!(summary.color_acc, 1.0);
        assert_eq!(summary.species_f1, 1.0);
        assert_eq!(summary.color_f1, 1.0);
        assert_eq!(summary.avg_f1, 1.0);
        assert!((summary.loss - 0.4).abs() < 1e-12);
        assert_eq!(summary.samples, 5);
    }

    #[test]
    fn test_species_wrong_color_right() {
        let mut acc = EpochAccumulator::new();
        acc.record_batch(1.0, &[1, 2, 0], &[0, 1, 2], &[5, 6, 7], &[5, 6, 7]);

        let summary = acc.summary(16, 8);
        assert_eq!(summary.species_acc, 0.0);
        assert_eq!(summary.color_acc, 1.0);
        assert_eq!(summary.species_f1, 0.0);
        assert_eq!(summary.avg_f1, 0.5);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut acc = EpochAccumulator::new();
        acc.record_batch(2.0, &[0], &[0], &[0], &[0]);
        acc.reset();

        assert_eq!(acc.batches(), 0);
        assert_eq!(acc.samples(), 0);
        assert_eq!(acc.summary(16, 8), PassSummary::default());
    }

    #[test]
    fn test_predicted_ids() {
        let device = Default::default();
        let logits = Tensor::<NdArray, 2>::from_floats(
            TensorData::new(vec![0.1f32, 0.9, 0.0, 2.0, -1.0, 0.5], [2, 3]),
            &device,
        );
        assert_eq!(predicted_ids(logits), vec![1, 0]);
    }
}
