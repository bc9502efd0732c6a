//! Training run driver
//!
//! Loads the manifest once, builds hold-out or k-fold splits and trains one
//! fresh model per fold. Everything a run produces lands in `output_dir`:
//! `run_config.json`, `fold{k}_log.csv`, `fold{k}_best_model.mpk` and
//! `run_summary.json`.

use std::path::PathBuf;

use burn::tensor::backend::{AutodiffBackend, Backend};
use chrono::{DateTime, Local};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::FlowerConfig;
use crate::dataset::{make_splits, FlowerDataset, SampleManifest};
use crate::model::{DualHeadClassifier, DualHeadClassifierConfig, FlowerBackbone};
use crate::training::trainer::{Trainer, TrainingReport};
use crate::utils::error::{FloraError, Result};
use crate::utils::format_duration;

/// Result of a whole training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub folds: Vec<TrainingReport>,
    /// Mean of the per-fold best average F1
    pub mean_best_f1: f64,
    pub output_dir: PathBuf,
}

impl RunSummary {
    /// Fold with the highest best F1
    pub fn best_fold(&self) -> Option<&TrainingReport> {
        self.folds
            .iter()
            .max_by(|a, b| a.best_f1.total_cmp(&b.best_f1))
    }

    pub fn print(&self) {
        println!();
        println!("{}", "Training Summary".cyan().bold());
        for fold in &self.folds {
            println!(
                "  fold {} | {} epochs ({:?}) | best avg F1 {:.4}",
                fold.fold, fold.epochs_run, fold.stop_reason, fold.best_f1
            );
        }
        println!(
            "  {} {:.4}",
            "Mean best avg F1:".green().bold(),
            self.mean_best_f1
        );
        println!("  Artifacts in {:?}", self.output_dir);
    }
}

/// Fresh dual-head model; the backbone is loaded from `backbone_weights` when set
pub fn build_model<B: Backend>(
    config: &FlowerConfig,
    device: &B::Device,
) -> Result<DualHeadClassifier<B>> {
    let model_config = DualHeadClassifierConfig::from_run_config(config);

    let backbone: FlowerBackbone<B> = model_config.backbone_config().init(device);
    let backbone = match &config.backbone_weights {
        Some(path) => {
            info!("Loading pretrained backbone from {:?}", path);
            backbone.load_pretrained(path, device)?
        }
        None => backbone,
    };

    Ok(model_config.init_with_backbone(backbone, device))
}

/// Train every fold the configuration asks for
pub fn run_training<B: AutodiffBackend>(config: &FlowerConfig, device: B::Device) -> Result<RunSummary> {
    config.validate_for_training()?;
    let started_at = Local::now();
    let timer = std::time::Instant::now();

    let labels = config.label_set()?;
    let manifest_path = config
        .dataset_path
        .as_ref()
        .ok_or_else(|| FloraError::Config("dataset_path is required for training".to_string()))?;
    let manifest = SampleManifest::from_csv(manifest_path, &labels)?;

    let splits = make_splits(manifest.len(), config.validation, config.seed)?;
    info!(
        "{} samples, {} fold(s), validation {:?}",
        manifest.len(),
        splits.len(),
        config.validation
    );

    std::fs::create_dir_all(&config.output_dir)?;
    config.save(&config.output_dir.join("run_config.json"))?;

    B::seed(config.seed);

    let all_items = FlowerDataset::new_cached(&manifest.samples, config.image_size, config.num_workers)?;

    let mut folds = Vec::with_capacity(splits.len());
    for split in &splits {
        println!(
            "{}",
            format!("Fold {}/{}", split.fold + 1, splits.len()).yellow().bold()
        );
        info!(
            "Fold {}: {} train / {} validation samples",
            split.fold,
            split.train.len(),
            split.valid.len()
        );

        let train = all_items.subset(&split.train);
        let valid = all_items.subset(&split.valid);

        let model = build_model::<B>(config, &device)?;
        let trainer = Trainer::<B>::new(config.clone(), device.clone(), split.fold);
        let (_, report) = trainer.fit(model, &train, &valid)?;

        folds.push(report);
    }

    let mean_best_f1 = folds.iter().map(|r| r.best_f1).sum::<f64>() / folds.len().max(1) as f64;

    let summary = RunSummary {
        started_at,
        finished_at: Local::now(),
        folds,
        mean_best_f1,
        output_dir: config.output_dir.clone(),
    };

    let json = serde_json::to_string_pretty(&summary)?;
    std::fs::write(config.output_dir.join("run_summary.json"), json)?;
    info!(
        "Run finished in {} | mean best avg F1 {:.4}",
        format_duration(timer.elapsed().as_secs_f64()),
        mean_best_f1
    );

    Ok(summary)
}
