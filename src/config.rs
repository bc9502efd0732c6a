//! Run Configuration
//!
//! A single statically-typed record holding every recognized option of a
//! training or inference run. It is built once (defaults, then an optional JSON
//! file, then CLI overrides), validated, and read-only afterwards.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::labels::LabelSet;
use crate::model::MIN_INPUT_SIZE;
use crate::utils::error::{FloraError, Result};

/// Compute device selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelector {
    /// NdArray CPU backend
    #[default]
    Cpu,
    /// CUDA backend (requires the `cuda` feature)
    Accelerator,
}

impl std::str::FromStr for DeviceSelector {
    type Err = FloraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(DeviceSelector::Cpu),
            "accelerator" | "cuda" | "gpu" => Ok(DeviceSelector::Accelerator),
            other => Err(FloraError::Config(format!(
                "unknown device '{}', expected cpu or accelerator",
                other
            ))),
        }
    }
}

/// How the manifest is divided into training and validation samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationStrategy {
    /// One run, `fraction` of the samples held out for validation
    HoldOut { fraction: f64 },
    /// `folds` runs, each validating on a different disjoint fold
    KFold { folds: usize },
}

impl Default for ValidationStrategy {
    fn default() -> Self {
        ValidationStrategy::KFold { folds: 5 }
    }
}

/// Segmentation stage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Square input size the segmentation model expects
    pub input_size: u32,

    /// Minimum detection confidence
    pub confidence_threshold: f32,

    /// Mask probability above which a pixel belongs to the flower
    pub mask_threshold: f32,

    /// ONNX segmentation model; `None` disables masking
    pub model_path: Option<PathBuf>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            input_size: crate::SEGMENTATION_INPUT_SIZE,
            confidence_threshold: 0.15,
            mask_threshold: 0.5,
            model_path: None,
        }
    }
}

/// Configuration for a training or inference run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowerConfig {
    /// Compute device
    pub device: DeviceSelector,

    /// Random seed for weight init, shuffling and splits
    pub seed: u64,

    /// Number of species classes
    pub num_species: usize,

    /// Number of color classes
    pub num_colors: usize,

    /// CSV manifest with `image_path,species,color` rows
    pub dataset_path: Option<PathBuf>,

    /// Hold-out or k-fold validation
    pub validation: ValidationStrategy,

    /// Epoch budget per fold
    pub epochs: usize,

    pub batch_size: usize,

    /// Threads used to decode images
    pub num_workers: usize,

    /// Learning rate of the head parameter group
    pub learning_rate: f64,

    pub weight_decay: f64,

    /// Where logs, checkpoints and the run config are written
    pub output_dir: PathBuf,

    /// Square classifier input size
    pub image_size: usize,

    /// Base filter count of the backbone; the embedding is 8x this
    pub base_filters: usize,

    /// Dropout probability of both heads
    pub dropout: f64,

    /// Unfreeze a backbone stage every this many epochs
    pub unfreeze_every: usize,

    /// Validation epochs without improvement before stopping
    pub patience: usize,

    /// Pretrained backbone record loaded before freezing
    pub backbone_weights: Option<PathBuf>,

    pub segmentation: SegmentationConfig,
}

impl Default for FlowerConfig {
    fn default() -> Self {
        Self {
            device: DeviceSelector::Cpu,
            seed: 42,
            num_species: crate::NUM_SPECIES,
            num_colors: crate::NUM_COLORS,
            dataset_path: None,
            validation: ValidationStrategy::default(),
            epochs: 50,
            batch_size: 32,
            num_workers: 4,
            learning_rate: 1e-4,
            weight_decay: 1e-4,
            output_dir: PathBuf::from("output"),
            image_size: crate::CLASSIFIER_INPUT_SIZE,
            base_filters: 32,
            dropout: 0.4,
            unfreeze_every: 3,
            patience: 10,
            backbone_weights: None,
            segmentation: SegmentationConfig::default(),
        }
    }
}

impl FlowerConfig {
    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FloraError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check the options that do not depend on the run kind
    pub fn validate(&self) -> Result<()> {
        if self.num_species == 0 || self.num_colors == 0 {
            return Err(FloraError::Config(
                "class counts must be greater than 0".to_string(),
            ));
        }

        // The label tables are fixed; head widths must agree with them
        LabelSet::for_heads(self.num_species, self.num_colors)?;

        if self.batch_size == 0 {
            return Err(FloraError::Config("batch_size must be greater than 0".to_string()));
        }
        if self.epochs == 0 {
            return Err(FloraError::Config("epochs must be greater than 0".to_string()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(FloraError::Config("learning_rate must be positive".to_string()));
        }
        if self.weight_decay < 0.0 {
            return Err(FloraError::Config("weight_decay must not be negative".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(FloraError::Config("dropout must be in [0.0, 1.0)".to_string()));
        }
        if self.image_size < MIN_INPUT_SIZE {
            return Err(FloraError::Config(format!(
                "image_size {} is below the backbone minimum of {} pixels",
                self.image_size, MIN_INPUT_SIZE
            )));
        }
        if self.base_filters == 0 {
            return Err(FloraError::Config("base_filters must be greater than 0".to_string()));
        }
        if self.unfreeze_every == 0 {
            return Err(FloraError::Config("unfreeze_every must be greater than 0".to_string()));
        }
        if self.patience == 0 {
            return Err(FloraError::Config("patience must be greater than 0".to_string()));
        }

        match self.validation {
            ValidationStrategy::HoldOut { fraction } => {
                if !(fraction > 0.0 && fraction < 1.0) {
                    return Err(FloraError::Config(format!(
                        "validation fraction {} must be in (0, 1)",
                        fraction
                    )));
                }
            }
            ValidationStrategy::KFold { folds } => {
                if folds < 2 {
                    return Err(FloraError::Config(format!(
                        "k-fold validation needs at least 2 folds, got {}",
                        folds
                    )));
                }
            }
        }

        let seg = &self.segmentation;
        if seg.input_size == 0 {
            return Err(FloraError::Config(
                "segmentation input_size must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&seg.confidence_threshold)
            || !(0.0..=1.0).contains(&seg.mask_threshold)
        {
            return Err(FloraError::Config(
                "segmentation thresholds must be in [0, 1]".to_string(),
            ));
        }

        if !crate::backend::is_available(self.device) {
            return Err(FloraError::Config(
                "device 'accelerator' requires a build with the `cuda` feature".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate for a training run: also requires an existing dataset manifest
    pub fn validate_for_training(&self) -> Result<()> {
        self.validate()?;

        match &self.dataset_path {
            None => Err(FloraError::Config(
                "dataset_path is required for training".to_string(),
            )),
            Some(path) if !path.exists() => Err(FloraError::PathNotFound(path.clone())),
            Some(_) => Ok(()),
        }
    }

    /// Label tables matching the configured head widths
    pub fn label_set(&self) -> Result<LabelSet> {
        LabelSet::for_heads(self.num_species, self.num_colors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FlowerConfig::default();
        assert_eq!(config.epochs, 50);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.seed, 42);
        assert_eq!(config.num_species, 16);
        assert_eq!(config.num_colors, 8);
        assert_eq!(config.validation, ValidationStrategy::KFold { folds: 5 });
        assert_eq!(config.segmentation.confidence_threshold, 0.15);
        assert_eq!(config.segmentation.mask_threshold, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = FlowerConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = FlowerConfig::default();
        config.num_species = 0;
        assert!(config.validate().is_err());

        let mut config = FlowerConfig::default();
        config.validation = ValidationStrategy::HoldOut { fraction: 1.5 };
        assert!(config.validate().is_err());

        let mut config = FlowerConfig::default();
        config.validation = ValidationStrategy::KFold { folds: 1 };
        assert!(config.validate().is_err());

        let mut config = FlowerConfig::default();
        config.learning_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = FlowerConfig::default();
        config.device = DeviceSelector::Accelerator;
        assert_eq!(config.validate().is_ok(), cfg!(feature = "cuda"));
    }

    #[test]
    fn test_image_size_must_survive_pooling() {
        let config = FlowerConfig {
            image_size: 16,
            ..FlowerConfig::default()
        };
        assert!(matches!(config.validate(), Err(FloraError::Config(_))));

        let config = FlowerConfig {
            image_size: MIN_INPUT_SIZE,
            ..FlowerConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_training_requires_dataset() {
        let config = FlowerConfig::default();
        assert!(matches!(
            config.validate_for_training(),
            Err(FloraError::Config(_))
        ));

        let mut config = FlowerConfig::default();
        config.dataset_path = Some(PathBuf::from("/definitely/not/here.csv"));
        assert!(matches!(
            config.validate_for_training(),
            Err(FloraError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: FlowerConfig =
            serde_json::from_str(r#"{"epochs": 3, "validation": {"kind": "hold_out", "fraction": 0.2}}"#)
                .unwrap();
        assert_eq!(config.epochs, 3);
        assert_eq!(config.validation, ValidationStrategy::HoldOut { fraction: 0.2 });
        assert_eq!(config.batch_size, 32);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = FlowerConfig::default();
        config.seed = 7;
        config.device = DeviceSelector::Cpu;
        config.save(&path).unwrap();

        let loaded = FlowerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_device_parse() {
        assert_eq!("cpu".parse::<DeviceSelector>().unwrap(), DeviceSelector::Cpu);
        assert_eq!(
            "accelerator".parse::<DeviceSelector>().unwrap(),
            DeviceSelector::Accelerator
        );
        assert!("tpu".parse::<DeviceSelector>().is_err());
    }
}
