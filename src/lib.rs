//! # Flora Classify
//!
//! A Rust library for flower species and color classification using the Burn framework.
//! One shared convolutional backbone feeds two heads, one per label.
//!
//! ## Features
//!
//! - **Dual-head classifier** predicting species (16 classes) and color (8 classes) together
//! - **Staged fine-tuning**: the backbone starts frozen and is unfrozen one stage at a time,
//!   deepest first, with each newly trainable stage added as its own optimizer group
//! - **F1-driven checkpointing** with patience-based early stopping and a flushed per-epoch CSV
//! - **Segmentation-gated inference**: background pixels are masked out using the most
//!   confident detection, and a photo with no detection is reported as "not found"
//!
//! ## Modules
//!
//! - `config`: run configuration (JSON) with defaults and validation
//! - `labels`: name/id tables for both heads
//! - `dataset`: CSV manifest, in-memory Burn dataset, hold-out and k-fold splits
//! - `model`: backbone, dual-head classifier, freeze helpers
//! - `training`: parameter groups, unfreezing, epoch loop, checkpoints, run driver
//! - `inference`: segmenters, masking preprocessor, predictor
//! - `utils`: logging, metrics, and error handling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use flora_classify::backend::CpuTrainingBackend;
//! use flora_classify::config::FlowerConfig;
//! use flora_classify::training::run_training;
//!
//! let mut config = FlowerConfig::default();
//! config.dataset_path = Some("data/flowers.csv".into());
//! let summary = run_training::<CpuTrainingBackend>(&config, Default::default())?;
//! summary.print();
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod labels;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{DeviceSelector, FlowerConfig, SegmentationConfig, ValidationStrategy};
pub use dataset::{FlowerBatch, FlowerBatcher, FlowerDataset, FlowerItem, SampleManifest};
pub use inference::{FlowerPrediction, FlowerPredictor, FlowerSegmenter, Prepared, SegmentationPreprocessor};
pub use labels::{LabelSet, LabelTable};
pub use model::{DualHeadClassifier, DualHeadClassifierConfig, ModelMode};
pub use training::{run_training, RunSummary, Trainer, TrainingReport};
pub use utils::error::{FloraError, Result};
pub use utils::metrics::{ConfusionMatrix, Metrics};

/// Number of flower species in the vocabulary
pub const NUM_SPECIES: usize = 16;

/// Number of flower colors in the vocabulary
pub const NUM_COLORS: usize = 8;

/// Square input size of the segmentation model
pub const SEGMENTATION_INPUT_SIZE: u32 = 640;

/// Square input size of the classifier
pub const CLASSIFIER_INPUT_SIZE: usize = 224;

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
