//! Classification metrics for one head
//!
//! Confusion matrix, per-class precision/recall/F1 and their macro averages.
//! Macro averages run over every class seen in either the labels or the
//! predictions, so a class that is predicted but never present scores zero and
//! still counts.

use serde::{Deserialize, Serialize};

/// Square count matrix; rows are true classes, columns are predictions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    counts: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            counts: vec![0; num_classes * num_classes],
        }
    }

    pub fn from_predictions(predictions: &[usize], labels: &[usize], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        for (&predicted, &actual) in predictions.iter().zip(labels) {
            cm.add(actual, predicted);
        }
        cm
    }

    /// Record one sample; ids outside the matrix are ignored
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if let Some(i) = self.index(actual, predicted) {
            self.counts[i] += 1;
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.index(actual, predicted).map_or(0, |i| self.counts[i])
    }

    /// Samples whose true class is `class`
    pub fn support(&self, class: usize) -> usize {
        (0..self.num_classes).map(|p| self.get(class, p)).sum()
    }

    /// Samples predicted as `class`
    pub fn predicted(&self, class: usize) -> usize {
        (0..self.num_classes).map(|a| self.get(a, class)).sum()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|c| self.get(c, c)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    fn index(&self, actual: usize, predicted: usize) -> Option<usize> {
        (actual < self.num_classes && predicted < self.num_classes)
            .then(|| actual * self.num_classes + predicted)
    }
}

/// Scores of a single class
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// True samples of this class
    pub support: usize,
    /// Samples predicted as this class
    pub predicted: usize,
}

impl ClassMetrics {
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let hits = cm.get(class_idx, class_idx);
        let support = cm.support(class_idx);
        let predicted = cm.predicted(class_idx);

        let precision = ratio(hits, predicted);
        let recall = ratio(hits, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            precision,
            recall,
            f1,
            support,
            predicted,
        }
    }

    /// Appears in the labels or the predictions
    pub fn is_present(&self) -> bool {
        self.support > 0 || self.predicted > 0
    }
}

/// Epoch-level metrics for one head
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub total_samples: usize,
    pub accuracy: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub per_class: Vec<ClassMetrics>,
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// `predictions` and `labels` are paired by position
    pub fn from_predictions(predictions: &[usize], labels: &[usize], num_classes: usize) -> Self {
        debug_assert_eq!(predictions.len(), labels.len());

        let confusion_matrix = ConfusionMatrix::from_predictions(predictions, labels, num_classes);
        let total_samples = confusion_matrix.total();
        if total_samples == 0 {
            return Self {
                confusion_matrix,
                ..Self::default()
            };
        }

        let per_class: Vec<ClassMetrics> = (0..num_classes)
            .map(|c| ClassMetrics::from_confusion_matrix(&confusion_matrix, c))
            .collect();

        let present: Vec<&ClassMetrics> = per_class.iter().filter(|m| m.is_present()).collect();
        let mean = |score: fn(&ClassMetrics) -> f64| {
            if present.is_empty() {
                0.0
            } else {
                present.iter().map(|m| score(m)).sum::<f64>() / present.len() as f64
            }
        };

        Self {
            total_samples,
            accuracy: confusion_matrix.accuracy(),
            macro_precision: mean(|m| m.precision),
            macro_recall: mean(|m| m.recall),
            macro_f1: mean(|m| m.f1),
            per_class,
            confusion_matrix,
        }
    }
}

/// Macro F1 of `predictions` against `labels`
pub fn macro_f1(predictions: &[usize], labels: &[usize], num_classes: usize) -> f64 {
    Metrics::from_predictions(predictions, labels, num_classes).macro_f1
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_counts() {
        let predictions = [0, 1, 2, 0, 1, 2, 0, 0, 2, 2];
        let labels = [0, 1, 2, 0, 2, 2, 1, 0, 1, 2];

        let cm = ConfusionMatrix::from_predictions(&predictions, &labels, 3);

        assert_eq!(cm.get(0, 0), 3);
        assert_eq!(cm.get(2, 1), 1);
        assert_eq!(cm.support(1), 3);
        assert_eq!(cm.predicted(0), 4);
        assert_eq!(cm.correct(), 7);
        assert!((cm.accuracy() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_ids_are_ignored() {
        let mut cm = ConfusionMatrix::new(2);
        cm.add(5, 0);
        cm.add(0, 9);
        assert_eq!(cm.total(), 0);
        assert_eq!(cm.get(5, 0), 0);
    }

    #[test]
    fn test_class_metrics() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 0, 1, 1], &[0, 0, 1, 1, 0], 2);
        let class0 = ClassMetrics::from_confusion_matrix(&cm, 0);

        assert_eq!(class0.support, 3);
        assert_eq!(class0.predicted, 3);
        assert!((class0.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((class0.recall - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_perfect_predictions_give_unit_f1() {
        let labels = [0, 1, 2, 3, 3, 1];
        let metrics = Metrics::from_predictions(&labels, &labels, 16);

        assert_eq!(metrics.accuracy, 1.0);
        assert!((metrics.macro_f1 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_spurious_predicted_class_counts() {
        // class 0 f1=1, class 1 p=1 r=0.5 f1=2/3, class 2 never occurs but is predicted: f1=0
        let metrics = Metrics::from_predictions(&[0, 1, 2], &[0, 1, 1], 3);
        let expected = (1.0 + 2.0 / 3.0) / 3.0;
        assert!((metrics.macro_f1 - expected).abs() < 1e-9);
    }

    #[test]
    fn test_all_wrong_gives_zero() {
        let metrics = Metrics::from_predictions(&[1, 1], &[0, 0], 2);
        assert_eq!(metrics.accuracy, 0.0);
        assert_eq!(metrics.macro_f1, 0.0);
    }

    #[test]
    fn test_empty_predictions() {
        let metrics = Metrics::from_predictions(&[], &[], 4);
        assert_eq!(metrics.total_samples, 0);
        assert_eq!(macro_f1(&[], &[], 4), 0.0);
    }
}
