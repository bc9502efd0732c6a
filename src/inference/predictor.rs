//! Flower predictor
//!
//! Wraps a trained dual-head model, a segmentation-gated preprocessor and the
//! label tables: photo path in, (species, color) names out.

use std::fmt;
use std::path::Path;
use std::time::Instant;

use burn::prelude::*;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::preprocess::{Prepared, SegmentationPreprocessor};
use super::segmentation::FlowerSegmenter;
use crate::config::FlowerConfig;
use crate::labels::LabelSet;
use crate::model::{DualHeadClassifier, DualHeadClassifierConfig};
use crate::training::accumulator::predicted_ids;
use crate::training::checkpoint::load_model;
use crate::utils::error::{FloraError, Result, ResultExt};

/// Result of a single prediction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlowerPrediction {
    Found { species: String, color: String },
    /// The segmenter saw no flower; not an error
    NotFound,
}

impl FlowerPrediction {
    pub fn is_found(&self) -> bool {
        matches!(self, FlowerPrediction::Found { .. })
    }

    /// `(species, color)`, both `None` when nothing was detected
    pub fn as_pair(&self) -> (Option<String>, Option<String>) {
        match self {
            FlowerPrediction::Found { species, color } => (Some(species.clone()), Some(color.clone())),
            FlowerPrediction::NotFound => (None, None),
        }
    }
}

impl fmt::Display for FlowerPrediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowerPrediction::Found { species, color } => write!(f, "{} ({})", species, color),
            FlowerPrediction::NotFound => write!(f, "no flower detected"),
        }
    }
}

/// Predictor for running inference with a trained model
pub struct FlowerPredictor<B: Backend, S> {
    model: DualHeadClassifier<B>,
    preprocessor: SegmentationPreprocessor<B, S>,
    labels: LabelSet,
}

impl<B: Backend, S: FlowerSegmenter> FlowerPredictor<B, S> {
    /// Load checkpoint weights into a model shaped by `config`
    pub fn load(
        config: &FlowerConfig,
        checkpoint: &Path,
        segmenter: S,
        labels: LabelSet,
        device: B::Device,
    ) -> Result<Self> {
        if !checkpoint.exists() && !checkpoint.with_extension("mpk").exists() {
            return Err(FloraError::PathNotFound(checkpoint.to_path_buf()));
        }

        let model_config = DualHeadClassifierConfig::from_run_config(config);
        let model = load_model::<B>(&model_config, checkpoint, &device)?;

        let preprocessor = SegmentationPreprocessor::new(
            segmenter,
            config.segmentation.clone(),
            config.image_size,
            device,
        );

        Self::from_model(model, preprocessor, labels)
    }

    /// Wrap an already built model; it is switched to eval mode
    pub fn from_model(
        model: DualHeadClassifier<B>,
        preprocessor: SegmentationPreprocessor<B, S>,
        labels: LabelSet,
    ) -> Result<Self> {
        if model.num_species() != labels.species.len() || model.num_colors() != labels.colors.len() {
            return Err(FloraError::Config(format!(
                "model heads are {}x{} but the label tables have {} species and {} colors",
                model.num_species(),
                model.num_colors(),
                labels.species.len(),
                labels.colors.len()
            )));
        }

        Ok(Self {
            model: model.eval_mode(),
            preprocessor,
            labels,
        })
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Predict species and color for a photo on disk
    pub fn predict(&self, path: &Path) -> Result<FlowerPrediction> {
        let start = Instant::now();
        let prediction = match self.preprocessor.prepare(path)? {
            Prepared::Found(tensor) => self.classify(tensor)?,
            Prepared::NotFound => {
                warn!("No flower detected in {:?}", path);
                FlowerPrediction::NotFound
            }
        };
        debug!("{:?} -> {} in {:.1} ms", path, prediction, start.elapsed().as_secs_f64() * 1000.0);
        Ok(prediction)
    }

    /// Predict for an in-memory image
    pub fn predict_image(&self, image: &DynamicImage) -> Result<FlowerPrediction> {
        match self.preprocessor.prepare_image(image)? {
            Prepared::Found(tensor) => self.classify(tensor),
            Prepared::NotFound => {
                warn!("No flower detected in image");
                Ok(FlowerPrediction::NotFound)
            }
        }
    }

    fn classify(&self, tensor: Tensor<B, 4>) -> Result<FlowerPrediction> {
        let (species_logits, color_logits) = self.model.forward(tensor);

        let species = first_id(predicted_ids(species_logits), "species")?;
        let color = first_id(predicted_ids(color_logits), "color")?;
        let (species, color) = self.labels.decode_pair(species, color)?;

        Ok(FlowerPrediction::Found { species, color })
    }
}

fn first_id(ids: Vec<usize>, head: &str) -> Result<usize> {
    ids.first()
        .copied()
        .with_context(|| format!("{} head produced no prediction", head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::segmentation::{Detection, FullFrameSegmenter};
    use crate::labels::{COLOR_NAMES, SPECIES_NAMES};
    use crate::training::checkpoint::save_model;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;

    type TestBackend = NdArray;

    struct NothingSegmenter;

    impl FlowerSegmenter for NothingSegmenter {
        fn segment(&self, _image: &RgbImage, _threshold: f32) -> Result<Vec<Detection>> {
            Ok(Vec::new())
        }
    }

    fn small_config() -> FlowerConfig {
        let mut config = FlowerConfig {
            base_filters: 2,
            image_size: 32,
            ..FlowerConfig::default()
        };
        config.segmentation.input_size = 32;
        config
    }

    fn save_checkpoint(dir: &Path, config: &FlowerConfig) -> PathBuf {
        let device = Default::default();
        let model: DualHeadClassifier<TestBackend> =
            DualHeadClassifierConfig::from_run_config(config).init(&device);
        save_model(&model, &dir.join("best_model")).unwrap()
    }

    fn write_photo(dir: &Path) -> PathBuf {
        let path = dir.join("photo.png");
        RgbImage::from_pixel(20, 20, Rgb([220, 40, 90])).save(&path).unwrap();
        path
    }

    #[test]
    fn test_not_found_yields_none_pair() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        let checkpoint = save_checkpoint(dir.path(), &config);

        let predictor = FlowerPredictor::<TestBackend, _>::load(
            &config,
            &checkpoint,
            NothingSegmenter,
            LabelSet::default(),
            Default::default(),
        )
        .unwrap();

        let prediction = predictor.predict(&write_photo(dir.path())).unwrap();
        assert_eq!(prediction, FlowerPrediction::NotFound);
        assert_eq!(prediction.as_pair(), (None, None));
    }

    #[test]
    fn test_found_decodes_to_vocabulary() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        let checkpoint = save_checkpoint(dir.path(), &config);

        let predictor = FlowerPredictor::<TestBackend, _>::load(
            &config,
            &checkpoint,
            FullFrameSegmenter,
            LabelSet::default(),
            Default::default(),
        )
        .unwrap();

        let (species, color) = predictor.predict(&write_photo(dir.path())).unwrap().as_pair();
        assert!(SPECIES_NAMES.contains(&species.unwrap().as_str()));
        assert!(COLOR_NAMES.contains(&color.unwrap().as_str()));
    }

    #[test]
    fn test_predictions_are_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let config = FlowerConfig {
            dropout: 0.9,
            ..small_config()
        };
        let checkpoint = save_checkpoint(dir.path(), &config);
        let photo = write_photo(dir.path());

        let predictor = FlowerPredictor::<TestBackend, _>::load(
            &config,
            &checkpoint,
            FullFrameSegmenter,
            LabelSet::default(),
            Default::default(),
        )
        .unwrap();

        let first = predictor.predict(&photo).unwrap();
        for _ in 0..3 {
            assert_eq!(predictor.predict(&photo).unwrap(), first);
        }
    }

    #[test]
    fn test_missing_checkpoint_is_error() {
        let result = FlowerPredictor::<TestBackend, _>::load(
            &small_config(),
            Path::new("/no/such/model"),
            FullFrameSegmenter,
            LabelSet::default(),
            Default::default(),
        );
        assert!(matches!(result, Err(FloraError::PathNotFound(_))));
    }

    #[test]
    fn test_head_label_mismatch_is_error() {
        let device = Default::default();
        let model: DualHeadClassifier<TestBackend> = DualHeadClassifierConfig::new()
            .with_base_filters(2)
            .with_num_colors(3)
            .init(&device);
        let preprocessor = SegmentationPreprocessor::new(
            FullFrameSegmenter,
            small_config().segmentation,
            32,
            device,
        );

        let result = FlowerPredictor::from_model(model, preprocessor, LabelSet::default());
        assert!(matches!(result, Err(FloraError::Config(_))));
    }
}
