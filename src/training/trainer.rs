//! Training orchestrator
//!
//! Runs the per-epoch state machine for one fold:
//! unfreeze check, train pass, validation pass, metric aggregation, CSV log row,
//! checkpoint decision, then continue or stop.

use std::path::{Path, PathBuf};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{decay::WeightDecayConfig, AdamConfig},
    tensor::{backend::AutodiffBackend, backend::Backend, ElementConversion, Tensor},
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::FlowerConfig;
use crate::dataset::{FlowerBatch, FlowerBatcher, FlowerDataset, FlowerItem};
use crate::model::DualHeadClassifier;
use crate::training::accumulator::{predicted_ids, EpochAccumulator};
use crate::training::checkpoint::{save_model, CheckpointDecision, CheckpointState};
use crate::training::epoch_log::{EpochLog, EpochRecord};
use crate::training::optimizer::GroupedOptimizer;
use crate::training::unfreeze::{should_unfreeze, StagedUnfreezer, UnfreezeOutcome};
use crate::utils::error::{FloraError, Result};
use crate::utils::logging::TrainingLogger;

/// Why the epoch loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// All configured epochs ran
    EpochBudget,
    /// Patience ran out
    Patience,
}

/// Outcome of training one fold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub fold: usize,
    pub epochs_run: usize,
    pub best_f1: f64,
    pub best_epoch: Option<usize>,
    pub stop_reason: StopReason,
    /// Best snapshot, if any epoch improved on an F1 of zero
    pub checkpoint_path: Option<PathBuf>,
    pub log_path: PathBuf,
    pub history: Vec<EpochRecord>,
}

/// Trains one model on one train/validation split
pub struct Trainer<B: AutodiffBackend> {
    config: FlowerConfig,
    device: B::Device,
    fold: usize,
    log_path: PathBuf,
    checkpoint_path: PathBuf,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Artifacts go to `<output_dir>/fold{fold}_log.csv` and `fold{fold}_best_model.mpk`
    pub fn new(config: FlowerConfig, device: B::Device, fold: usize) -> Self {
        let log_path = config.output_dir.join(format!("fold{}_log.csv", fold));
        let checkpoint_path = config.output_dir.join(format!("fold{}_best_model", fold));
        Self {
            config,
            device,
            fold,
            log_path,
            checkpoint_path,
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Run the epoch loop; returns the final model and the report
    pub fn fit(
        &self,
        model: DualHeadClassifier<B>,
        train: &FlowerDataset,
        valid: &FlowerDataset,
    ) -> Result<(DualHeadClassifier<B>, TrainingReport)> {
        self.config.validate()?;
        if train.is_empty() || valid.is_empty() {
            return Err(FloraError::Training(format!(
                "fold {} needs non-empty train and validation sets (got {} / {})",
                self.fold,
                train.len(),
                valid.len()
            )));
        }

        let config = &self.config;
        let num_species = model.num_species();
        let num_colors = model.num_colors();

        let head_ids = model.head_param_ids();
        let adam = AdamConfig::new()
            .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay as f32)))
            .init::<B, DualHeadClassifier<B>>();
        let mut optimizer = GroupedOptimizer::new(adam, head_ids.clone(), config.learning_rate);
        let mut unfreezer = StagedUnfreezer::new(head_ids);
        let mut unfreeze_step = 0usize;

        let mut checkpoint = CheckpointState::new(config.patience);
        let mut epoch_log = EpochLog::create(&self.log_path)?;
        let mut logger = TrainingLogger::new(self.fold, config.epochs);
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(self.fold as u64));

        let batcher = FlowerBatcher::new(train.image_size());
        let mut train_acc = EpochAccumulator::new();
        let mut valid_acc = EpochAccumulator::new();
        let mut history = Vec::new();
        let mut checkpoint_written = None;
        let mut stop_reason = StopReason::EpochBudget;

        let mut model = model;
        for epoch in 0..config.epochs {
            logger.start_epoch(epoch);

            if should_unfreeze(epoch, config.unfreeze_every) {
                unfreeze_step += 1;
                let learning_rate = optimizer.first_group_lr();
                let (next, outcome) =
                    unfreezer.unfreeze_next_stage(model, unfreeze_step, &mut optimizer, learning_rate);
                model = next;
                if let UnfreezeOutcome::Unfrozen { stage, params } = outcome {
                    debug!("Epoch {}: {} now trainable ({} params)", epoch, stage, params);
                }
            }

            train_acc.reset();
            model = self.train_pass(model, train, &batcher, &mut optimizer, &mut rng, &mut train_acc)?;
            let train_summary = train_acc.summary(num_species, num_colors);

            valid_acc.reset();
            self.validate_pass(&model, valid, &batcher, &mut valid_acc)?;
            let valid_summary = valid_acc.summary(num_species, num_colors);

            let record = EpochRecord::new(epoch, &train_summary, &valid_summary);
            epoch_log.append(&record)?;
            history.push(record);
            logger.end_epoch(train_summary.loss, valid_summary.loss, valid_summary.avg_f1);
            debug!(
                "species acc {:.4}/{:.4} | color acc {:.4}/{:.4} | species F1 {:.4} | color F1 {:.4}",
                train_summary.species_acc,
                valid_summary.species_acc,
                train_summary.color_acc,
                valid_summary.color_acc,
                valid_summary.species_f1,
                valid_summary.color_f1
            );

            match checkpoint.observe(epoch, valid_summary.avg_f1) {
                CheckpointDecision::Improved { previous, current } => {
                    logger.log_new_best(previous, current);
                    checkpoint_written = Some(save_model(&model, &self.checkpoint_path)?);
                }
                CheckpointDecision::NoImprovement { patience } => {
                    debug!("No improvement for {} epoch(s)", patience);
                }
            }

            if checkpoint.should_stop() {
                logger.log_early_stop(checkpoint.patience_counter);
                stop_reason = StopReason::Patience;
                break;
            }
        }

        logger.log_complete(history.len(), checkpoint.best_f1);

        let report = TrainingReport {
            fold: self.fold,
            epochs_run: history.len(),
            best_f1: checkpoint.best_f1,
            best_epoch: checkpoint.best_epoch,
            stop_reason,
            checkpoint_path: checkpoint_written,
            log_path: epoch_log.path().to_path_buf(),
            history,
        };

        Ok((model, report))
    }

    fn train_pass<O>(
        &self,
        model: DualHeadClassifier<B>,
        dataset: &FlowerDataset,
        batcher: &FlowerBatcher,
        optimizer: &mut GroupedOptimizer<O>,
        rng: &mut ChaCha8Rng,
        acc: &mut EpochAccumulator,
    ) -> Result<DualHeadClassifier<B>>
    where
        O: burn::optim::Optimizer<DualHeadClassifier<B>, B>,
    {
        let mut model = model.train_mode();

        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        indices.shuffle(rng);

        let batch_size = self.config.batch_size;
        let num_batches = indices.len().div_ceil(batch_size);
        let pb = batch_progress(num_batches, "train");

        for chunk in indices.chunks(batch_size) {
            let items = collect_items(dataset, chunk)?;
            let (species_labels, color_labels) = item_labels(&items);
            let batch: FlowerBatch<B> = batcher.batch(items, &self.device);

            let (species_logits, color_logits) = model.forward(batch.images);
            let loss = combined_loss(
                species_logits.clone(),
                color_logits.clone(),
                batch.species,
                batch.colors,
            );
            let loss_value: f64 = loss.clone().into_scalar().elem();

            let species_preds = predicted_ids(species_logits);
            let color_preds = predicted_ids(color_logits);

            // Fresh gradients every backward pass; nothing to zero
            let grads = loss.backward();
            model = optimizer.step(model, grads);

            acc.record_batch(
                loss_value,
                &species_preds,
                &species_labels,
                &color_preds,
                &color_labels,
            );
            pb.inc(1);
        }

        pb.finish_and_clear();
        Ok(model)
    }

    fn validate_pass(
        &self,
        model: &DualHeadClassifier<B>,
        dataset: &FlowerDataset,
        batcher: &FlowerBatcher,
        acc: &mut EpochAccumulator,
    ) -> Result<()> {
        // Inner backend: no gradient tracking
        let model = model.valid().eval_mode();
        let device = &self.device;

        let indices: Vec<usize> = (0..dataset.len()).collect();
        let batch_size = self.config.batch_size;
        let pb = batch_progress(indices.len().div_ceil(batch_size), "valid");

        for chunk in indices.chunks(batch_size) {
            let items = collect_items(dataset, chunk)?;
            let (species_labels, color_labels) = item_labels(&items);
            let batch: FlowerBatch<B::InnerBackend> = batcher.batch(items, device);

            let (species_logits, color_logits) = model.forward(batch.images);
            let loss = combined_loss(
                species_logits.clone(),
                color_logits.clone(),
                batch.species,
                batch.colors,
            );
            let loss_value: f64 = loss.into_scalar().elem();

            acc.record_batch(
                loss_value,
                &predicted_ids(species_logits),
                &species_labels,
                &predicted_ids(color_logits),
                &color_labels,
            );
            pb.inc(1);
        }

        pb.finish_and_clear();
        info!(
            "Validation: {} samples in {} batches",
            acc.samples(),
            acc.batches()
        );
        Ok(())
    }
}

/// Species cross-entropy plus color cross-entropy, weighted 1:1
pub fn combined_loss<B: Backend>(
    species_logits: Tensor<B, 2>,
    color_logits: Tensor<B, 2>,
    species_targets: Tensor<B, 1, burn::tensor::Int>,
    color_targets: Tensor<B, 1, burn::tensor::Int>,
) -> Tensor<B, 1> {
    let loss_fn = CrossEntropyLossConfig::new().init(&species_logits.device());
    let species_loss = loss_fn.forward(species_logits, species_targets);
    let color_loss = loss_fn.forward(color_logits, color_targets);
    species_loss + color_loss
}

fn collect_items(dataset: &FlowerDataset, indices: &[usize]) -> Result<Vec<FlowerItem>> {
    indices
        .iter()
        .map(|&i| {
            dataset
                .get(i)
                .ok_or_else(|| FloraError::Dataset(format!("sample {} out of range", i)))
        })
        .collect()
}

fn item_labels(items: &[FlowerItem]) -> (Vec<usize>, Vec<usize>) {
    items.iter().map(|item| (item.species, item.color)).unzip()
}

fn batch_progress(len: usize, phase: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {prefix} [{bar:30.cyan/blue}] {pos}/{len} batches")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_prefix(phase.to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    use crate::model::{freeze, DualHeadClassifierConfig};
    use crate::training::epoch_log::read_epoch_log;

    type TestBackend = Autodiff<NdArray>;

    const SIZE: usize = 32;

    fn dataset(n: usize) -> FlowerDataset {
        let items = (0..n)
            .map(|i| {
                let value = (i % 4) as f32 / 4.0;
                FlowerItem::from_data(vec![value; 3 * SIZE * SIZE], i % 4, i % 2, format!("{}", i))
            })
            .collect();
        FlowerDataset::from_items(items, SIZE)
    }

    fn config(dir: &Path, epochs: usize) -> FlowerConfig {
        FlowerConfig {
            epochs,
            batch_size: 4,
            image_size: SIZE,
            base_filters: 2,
            output_dir: dir.to_path_buf(),
            learning_rate: 1e-3,
            ..FlowerConfig::default()
        }
    }

    #[test]
    fn test_combined_loss_is_sum() {
        let device = Default::default();
        let species = Tensor::<NdArray, 2>::from_floats(
            TensorData::new(vec![2.0f32, 0.0, 0.0, 2.0], [2, 2]),
            &device,
        );
        let color = Tensor::<NdArray, 2>::zeros([2, 3], &device);
        let species_t = Tensor::<NdArray, 1, burn::tensor::Int>::from_data(
            TensorData::new(vec![0i64, 1], [2]),
            &device,
        );
        let color_t = Tensor::<NdArray, 1, burn::tensor::Int>::from_data(
            TensorData::new(vec![0i64, 2], [2]),
            &device,
        );

        let loss: f32 = combined_loss(species, color, species_t, color_t)
            .into_scalar()
            .elem();

        let species_ce = -(2.0f32.exp() / (2.0f32.exp() + 1.0)).ln();
        let color_ce = 3.0f32.ln();
        assert!((loss - (species_ce + color_ce)).abs() < 1e-4);
    }

    #[test]
    fn test_fit_writes_log_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = config(dir.path(), 4);

        let model: DualHeadClassifier<TestBackend> = DualHeadClassifierConfig::new()
            .with_base_filters(config.base_filters)
            .init(&device);
        let trainer = Trainer::<TestBackend>::new(config, device, 0);

        let (model, report) = trainer.fit(model, &dataset(10), &dataset(6)).unwrap();

        assert_eq!(report.epochs_run, 4);
        assert_eq!(report.stop_reason, StopReason::EpochBudget);
        assert_eq!(report.history.len(), 4);

        let rows = read_epoch_log(&report.log_path).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3].epoch, 3);

        if report.best_f1 > 0.0 {
            assert!(report.checkpoint_path.as_ref().unwrap().exists());
        }

        // Epoch 3 unfroze stage4
        assert!(freeze::census::<TestBackend, _>(&model.backbone.stage4).all_trainable());
        assert!(freeze::census::<TestBackend, _>(&model.backbone.stage3).all_frozen());
        // Two heads (weight + bias each) plus the eight stage4 parameters
        assert_eq!(freeze::trainable_param_ids::<TestBackend, _>(&model).len(), 4 + 8);
    }

    #[test]
    fn test_fit_stops_on_patience() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let mut config = config(dir.path(), 30);
        config.patience = 2;
        // Negligible learning rate, so validation F1 plateaus quickly
        config.learning_rate = 1e-12;

        let model: DualHeadClassifier<TestBackend> = DualHeadClassifierConfig::new()
            .with_base_filters(config.base_filters)
            .with_dropout(0.0)
            .init(&device);
        let trainer = Trainer::<TestBackend>::new(config, device, 1);

        let (_, report) = trainer.fit(model, &dataset(8), &dataset(4)).unwrap();

        assert_eq!(report.stop_reason, StopReason::Patience);
        let first_improvement = report.best_epoch.map(|e| e as i64).unwrap_or(-1);
        assert_eq!(report.epochs_run as i64, first_improvement + 2 + 1);
    }

    #[test]
    fn test_fit_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let mut config = config(dir.path(), 1);
        config.batch_size = 0;
        let model: DualHeadClassifier<TestBackend> = DualHeadClassifierConfig::new()
            .with_base_filters(2)
            .init(&device);
        let trainer = Trainer::<TestBackend>::new(config, device, 0);

        assert!(matches!(
            trainer.fit(model, &dataset(4), &dataset(4)),
            Err(FloraError::Config(_))
        ));
    }

    #[test]
    fn test_fit_rejects_empty_split() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = config(dir.path(), 1);
        let model: DualHeadClassifier<TestBackend> = DualHeadClassifierConfig::new()
            .with_base_filters(2)
            .init(&device);
        let trainer = Trainer::<TestBackend>::new(config, device, 0);

        let empty = FlowerDataset::from_items(Vec::new(), SIZE);
        assert!(matches!(
            trainer.fit(model, &dataset(4), &empty),
            Err(FloraError::Training(_))
        ));
    }
}
