//! Flora CLI
//!
//! Entry point for training the dual-head flower classifier and running
//! segmentation-gated predictions with the Burn framework.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use burn::tensor::backend::Backend;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use flora_classify::backend::{backend_name, CpuBackend, CpuTrainingBackend};
use flora_classify::config::{DeviceSelector, FlowerConfig, ValidationStrategy};
use flora_classify::inference::{FlowerPrediction, FlowerPredictor, FlowerSegmenter, FullFrameSegmenter};
use flora_classify::labels::LabelSet;
use flora_classify::training::{run_training, RunSummary};
use flora_classify::utils::logging::{init_logging, LogConfig};

/// Flower species and color classification
///
/// Trains a two-head classifier with staged backbone unfreezing and predicts
/// on photos after masking out everything but the flower.
#[derive(Parser, Debug)]
#[command(name = "flora")]
#[command(version)]
#[command(about = "Flower species/color classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train one model per validation fold
    Train {
        /// JSON configuration file; flags below override its fields
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size for training
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Learning rate of the head group
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// CSV manifest with image_path,species,color rows
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Output directory for logs and checkpoints
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Number of k-fold splits
        #[arg(long, conflicts_with = "val_fraction")]
        folds: Option<usize>,

        /// Hold out this fraction for validation instead of k-fold
        #[arg(long)]
        val_fraction: Option<f64>,

        /// Compute device (cpu or accelerator)
        #[arg(long)]
        device: Option<DeviceSelector>,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Predict species and color for one photo
    Predict {
        /// Checkpoint written by `train` (with or without .mpk)
        #[arg(short, long)]
        model: PathBuf,

        /// Photo to classify
        #[arg(short, long)]
        image: PathBuf,

        /// YOLOv8-seg ONNX model (needs the `onnx` feature)
        #[arg(short, long, conflicts_with = "no_segmentation")]
        segmenter: Option<PathBuf>,

        /// Classify the whole photo without masking
        #[arg(long, default_value = "false")]
        no_segmentation: bool,

        /// JSON configuration; defaults to run_config.json next to the checkpoint
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the prediction as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Print the species and color vocabularies
    Labels,

    /// Write the default configuration as JSON
    InitConfig {
        /// Output file path
        #[arg(short, long, default_value = "flora.json")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Train {
            config,
            epochs,
            batch_size,
            learning_rate,
            dataset,
            output_dir,
            folds,
            val_fraction,
            device,
            seed,
        } => {
            print_banner();

            let mut config = match config {
                Some(path) => FlowerConfig::load(&path)?,
                None => FlowerConfig::default(),
            };
            if let Some(epochs) = epochs {
                config.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if let Some(learning_rate) = learning_rate {
                config.learning_rate = learning_rate;
            }
            if let Some(dataset) = dataset {
                config.dataset_path = Some(dataset);
            }
            if let Some(output_dir) = output_dir {
                config.output_dir = output_dir;
            }
            if let Some(folds) = folds {
                config.validation = ValidationStrategy::KFold { folds };
            }
            if let Some(fraction) = val_fraction {
                config.validation = ValidationStrategy::HoldOut { fraction };
            }
            if let Some(device) = device {
                config.device = device;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }

            cmd_train(&config)?.print();
        }

        Commands::Predict {
            model,
            image,
            segmenter,
            no_segmentation,
            config,
            json,
        } => {
            cmd_predict(&model, &image, segmenter, no_segmentation, config, json)?;
        }

        Commands::Labels => cmd_labels(),

        Commands::InitConfig { output } => {
            FlowerConfig::default().save(&output)?;
            println!("{} {:?}", "Wrote default configuration to".green(), output);
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +------------------------------------------------------------+
 |   Flora: flower species and color classification           |
 |   Dual-head fine-tuning with Burn + Rust                    |
 +------------------------------------------------------------+
  "#
        .green()
    );
}

fn cmd_train(config: &FlowerConfig) -> Result<RunSummary> {
    config.validate_for_training()?;
    info!("Training on {}", backend_name(config.device));

    let summary = match config.device {
        DeviceSelector::Cpu => run_training::<CpuTrainingBackend>(config, Default::default())?,
        DeviceSelector::Accelerator => train_on_accelerator(config)?,
    };
    Ok(summary)
}

#[cfg(feature = "cuda")]
fn train_on_accelerator(config: &FlowerConfig) -> Result<RunSummary> {
    use flora_classify::backend::CudaTrainingBackend;
    Ok(run_training::<CudaTrainingBackend>(config, Default::default())?)
}

#[cfg(not(feature = "cuda"))]
fn train_on_accelerator(_config: &FlowerConfig) -> Result<RunSummary> {
    bail!("accelerator requested but this binary was built without the `cuda` feature")
}

/// Configuration for prediction: explicit file, else the run's own config, else defaults
fn predict_config(model: &Path, config: Option<PathBuf>) -> Result<FlowerConfig> {
    if let Some(path) = config {
        return Ok(FlowerConfig::load(&path)?);
    }
    let beside = model
        .parent()
        .map(|dir| dir.join("run_config.json"))
        .filter(|path| path.exists());
    match beside {
        Some(path) => {
            info!("Using configuration {:?}", path);
            Ok(FlowerConfig::load(&path)?)
        }
        None => Ok(FlowerConfig::default()),
    }
}

fn build_segmenter(
    config: &FlowerConfig,
    segmenter: Option<PathBuf>,
    no_segmentation: bool,
) -> Result<Box<dyn FlowerSegmenter>> {
    if no_segmentation {
        return Ok(Box::new(FullFrameSegmenter));
    }
    match segmenter.or_else(|| config.segmentation.model_path.clone()) {
        Some(path) => load_onnx_segmenter(&path),
        None => bail!("no segmentation model given; pass --segmenter <model.onnx> or --no-segmentation"),
    }
}

#[cfg(feature = "onnx")]
fn load_onnx_segmenter(path: &Path) -> Result<Box<dyn FlowerSegmenter>> {
    let segmenter = flora_classify::inference::YoloSegmenter::load(path)
        .with_context(|| format!("loading segmentation model {:?}", path))?;
    Ok(Box::new(segmenter))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx_segmenter(path: &Path) -> Result<Box<dyn FlowerSegmenter>> {
    bail!(
        "cannot load {:?}: this binary was built without the `onnx` feature",
        path
    )
}

fn cmd_predict(
    model: &Path,
    image: &Path,
    segmenter: Option<PathBuf>,
    no_segmentation: bool,
    config: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let config = predict_config(model, config)?;
    config.validate()?;
    let labels = config.label_set()?;
    let segmenter = build_segmenter(&config, segmenter, no_segmentation)?;

    let prediction = match config.device {
        DeviceSelector::Cpu => {
            predict_on::<CpuBackend>(&config, model, image, segmenter, labels, Default::default())?
        }
        DeviceSelector::Accelerator => {
            predict_on_accelerator(&config, model, image, segmenter, labels)?
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&prediction)?);
    } else if prediction.is_found() {
        println!("{} {}", "Prediction:".green().bold(), prediction);
    } else {
        println!("{} {}", "Prediction:".yellow().bold(), prediction);
    }

    Ok(())
}

fn predict_on<B: Backend>(
    config: &FlowerConfig,
    model: &Path,
    image: &Path,
    segmenter: Box<dyn FlowerSegmenter>,
    labels: LabelSet,
    device: B::Device,
) -> Result<FlowerPrediction> {
    let predictor = FlowerPredictor::<B, _>::load(config, model, segmenter, labels, device)
        .with_context(|| format!("loading checkpoint {:?}", model))?;

    predictor
        .predict(image)
        .with_context(|| format!("predicting {:?}", image))
}

#[cfg(feature = "cuda")]
fn predict_on_accelerator(
    config: &FlowerConfig,
    model: &Path,
    image: &Path,
    segmenter: Box<dyn FlowerSegmenter>,
    labels: LabelSet,
) -> Result<FlowerPrediction> {
    use flora_classify::backend::CudaBackend;
    predict_on::<CudaBackend>(config, model, image, segmenter, labels, Default::default())
}

#[cfg(not(feature = "cuda"))]
fn predict_on_accelerator(
    _config: &FlowerConfig,
    _model: &Path,
    _image: &Path,
    _segmenter: Box<dyn FlowerSegmenter>,
    _labels: LabelSet,
) -> Result<FlowerPrediction> {
    bail!("accelerator requested but this binary was built without the `cuda` feature")
}

fn cmd_labels() {
    let labels = LabelSet::default();

    println!("{}", "Species".cyan().bold());
    for (id, name) in labels.species.names().iter().enumerate() {
        println!("  {:>2}  {}", id, name);
    }
    println!("{}", "Colors".cyan().bold());
    for (id, name) in labels.colors.names().iter().enumerate() {
        println!("  {:>2}  {}", id, name);
    }
}
