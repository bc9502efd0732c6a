//! Segmentation-gated preprocessing
//!
//! Photo in, classifier tensor out, but only when a flower was found:
//!
//! 1. Resize to the segmenter's square input (bilinear)
//! 2. Segment; no detections means [`Prepared::NotFound`]
//! 3. Keep the most confident detection, resize its mask (nearest) and
//!    binarize it
//! 4. Zero the background
//! 5. Resize to the classifier input, scale to [0, 1], ImageNet-normalize

use std::path::Path;

use burn::prelude::*;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use tracing::debug;

use super::segmentation::{select_best, FlowerSegmenter};
use crate::config::SegmentationConfig;
use crate::dataset::burn_dataset::{imagenet_normalize, rgb_to_chw};
use crate::utils::error::{FloraError, Result};

/// Outcome of preprocessing one photo
#[derive(Debug, Clone)]
pub enum Prepared<B: Backend> {
    /// Normalized tensor of shape [1, 3, image_size, image_size]
    Found(Tensor<B, 4>),
    /// The segmenter returned no detections
    NotFound,
}

impl<B: Backend> Prepared<B> {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Prepared::NotFound)
    }

    pub fn into_tensor(self) -> Option<Tensor<B, 4>> {
        match self {
            Prepared::Found(tensor) => Some(tensor),
            Prepared::NotFound => None,
        }
    }
}

/// Decode any supported image file into RGB
pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    let image = ImageReader::open(path)
        .map_err(|e| FloraError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| FloraError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| FloraError::ImageLoad(path.to_path_buf(), e.to_string()))?;
    Ok(image.to_rgb8())
}

/// Masks out everything but the best detected flower and normalizes the rest
pub struct SegmentationPreprocessor<B: Backend, S> {
    segmenter: S,
    config: SegmentationConfig,
    image_size: usize,
    device: B::Device,
}

impl<B: Backend, S: FlowerSegmenter> SegmentationPreprocessor<B, S> {
    pub fn new(segmenter: S, config: SegmentationConfig, image_size: usize, device: B::Device) -> Self {
        Self {
            segmenter,
            config,
            image_size,
            device,
        }
    }

    pub fn segmenter(&self) -> &S {
        &self.segmenter
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Load a photo from disk and prepare it
    pub fn prepare(&self, path: &Path) -> Result<Prepared<B>> {
        let rgb = load_rgb(path)?;
        self.prepare_rgb(&rgb)
    }

    /// Prepare an in-memory image
    pub fn prepare_image(&self, image: &DynamicImage) -> Result<Prepared<B>> {
        self.prepare_rgb(&image.to_rgb8())
    }

    fn prepare_rgb(&self, rgb: &RgbImage) -> Result<Prepared<B>> {
        Ok(match self.masked_image(rgb)? {
            Some(masked) => Prepared::Found(self.to_tensor(&masked)),
            None => Prepared::NotFound,
        })
    }

    /// Background-zeroed image at the segmenter resolution, or `None` when
    /// nothing was detected
    pub fn masked_image(&self, rgb: &RgbImage) -> Result<Option<RgbImage>> {
        let size = self.config.input_size;
        let mut resized = imageops::resize(rgb, size, size, FilterType::Triangle);

        let detections = self
            .segmenter
            .segment(&resized, self.config.confidence_threshold)?;
        let Some(best) = select_best(&detections) else {
            debug!("{}: no detections", self.segmenter.name());
            return Ok(None);
        };
        let detection = &detections[best];
        let threshold = self.config.mask_threshold;
        debug!(
            "{}: {} detection(s), best confidence {:.3}, mask coverage {:.2}",
            self.segmenter.name(),
            detections.len(),
            detection.confidence,
            detection.coverage(threshold)
        );

        let (mask_w, mask_h) = detection.mask.dimensions();
        if mask_w == 0 || mask_h == 0 {
            return Err(FloraError::Segmentation("detection carries an empty mask".to_string()));
        }
        let mask = imageops::resize(&detection.mask, size, size, FilterType::Nearest);

        for (x, y, pixel) in resized.enumerate_pixels_mut() {
            if mask.get_pixel(x, y)[0] <= threshold {
                *pixel = Rgb([0, 0, 0]);
            }
        }

        Ok(Some(resized))
    }

    fn to_tensor(&self, masked: &RgbImage) -> Tensor<B, 4> {
        let size = self.image_size;
        let resized = imageops::resize(masked, size as u32, size as u32, FilterType::Triangle);
        let data = TensorData::new(rgb_to_chw(&resized), [1, 3, size, size]);
        imagenet_normalize(Tensor::<B, 4>::from_floats(data, &self.device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::segmentation::{Detection, Mask};
    use burn_ndarray::NdArray;
    use image::Luma;

    type TestBackend = NdArray;

    /// Returns canned detections regardless of the input
    struct CannedSegmenter(Vec<Detection>);

    impl FlowerSegmenter for CannedSegmenter {
        fn segment(&self, _image: &RgbImage, _threshold: f32) -> Result<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    fn half_mask(left: bool) -> Mask {
        Mask::from_fn(4, 4, |x, _| {
            let on = if left { x < 2 } else { x >= 2 };
            Luma([if on { 1.0 } else { 0.0 }])
        })
    }

    fn preprocessor(detections: Vec<Detection>) -> SegmentationPreprocessor<TestBackend, CannedSegmenter> {
        let config = SegmentationConfig {
            input_size: 8,
            ..SegmentationConfig::default()
        };
        SegmentationPreprocessor::new(CannedSegmenter(detections), config, 4, Default::default())
    }

    #[test]
    fn test_no_detections_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaf.png");
        RgbImage::from_pixel(10, 10, Rgb([20, 200, 20])).save(&path).unwrap();

        let prepared = preprocessor(Vec::new()).prepare(&path).unwrap();
        assert!(prepared.is_not_found());
        assert!(prepared.into_tensor().is_none());
    }

    #[test]
    fn test_best_detection_mask_wins_in_any_order() {
        let white = RgbImage::from_pixel(8, 8, Rgb([255, 255, 255]));

        for detections in [
            vec![Detection::new(0.9, half_mask(true)), Detection::new(0.4, half_mask(false))],
            vec![Detection::new(0.4, half_mask(false)), Detection::new(0.9, half_mask(true))],
        ] {
            let masked = preprocessor(detections).masked_image(&white).unwrap().unwrap();
            assert_eq!(masked.get_pixel(1, 3), &Rgb([255, 255, 255]));
            assert_eq!(masked.get_pixel(6, 3), &Rgb([0, 0, 0]));
        }
    }

    #[test]
    fn test_found_tensor_shape() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(12, 9, Rgb([90, 60, 30])));
        let prepared = preprocessor(vec![Detection::full_frame(0.8, 2, 2)])
            .prepare_image(&image)
            .unwrap();

        let tensor = prepared.into_tensor().unwrap();
        assert_eq!(tensor.dims(), [1, 3, 4, 4]);
    }

    #[test]
    fn test_masked_background_normalizes_to_negative_mean() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([255, 255, 255])));
        let empty = Mask::from_pixel(2, 2, Luma([0.0]));
        let tensor = preprocessor(vec![Detection::new(0.7, empty)])
            .prepare_image(&image)
            .unwrap()
            .into_tensor()
            .unwrap();

        let first: Vec<f32> = tensor.into_data().iter::<f32>().take(1).collect();
        let expected = -crate::IMAGENET_MEAN[0] / crate::IMAGENET_STD[0];
        assert!((first[0] - expected).abs() < 1e-4);
    }

    #[test]
    fn test_empty_mask_is_error() {
        let image = RgbImage::new(8, 8);
        let result = preprocessor(vec![Detection::new(0.7, Mask::new(0, 0))]).masked_image(&image);
        assert!(matches!(result, Err(FloraError::Segmentation(_))));
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = preprocessor(Vec::new()).prepare(Path::new("/no/such/flower.jpg"));
        assert!(matches!(result, Err(FloraError::ImageLoad(_, _))));
    }
}
