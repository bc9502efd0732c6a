//! Flower segmentation collaborators
//!
//! A segmenter turns a square RGB image into zero or more detections, each a
//! confidence score and a per-pixel foreground probability mask. The
//! preprocessor keeps only the single most confident one.

use image::{ImageBuffer, Luma, RgbImage};

use crate::utils::error::Result;

/// Single-channel probability mask in [0, 1]
pub type Mask = ImageBuffer<Luma<f32>, Vec<f32>>;

/// One segmented region
#[derive(Debug, Clone)]
pub struct Detection {
    /// Detector confidence in [0, 1]
    pub confidence: f32,
    /// Foreground probability per pixel; any resolution, resized by the caller
    pub mask: Mask,
}

impl Detection {
    pub fn new(confidence: f32, mask: Mask) -> Self {
        Self { confidence, mask }
    }

    /// Mask covering a `width` x `height` frame completely
    pub fn full_frame(confidence: f32, width: u32, height: u32) -> Self {
        Self {
            confidence,
            mask: Mask::from_pixel(width, height, Luma([1.0])),
        }
    }

    /// Fraction of mask pixels strictly above `threshold`
    pub fn coverage(&self, threshold: f32) -> f32 {
        let total = self.mask.pixels().len();
        if total == 0 {
            return 0.0;
        }
        let on = self.mask.pixels().filter(|p| p[0] > threshold).count();
        on as f32 / total as f32
    }
}

/// Anything that can find flowers in an image
pub trait FlowerSegmenter {
    /// Detections with confidence at or above `confidence_threshold`
    fn segment(&self, image: &RgbImage, confidence_threshold: f32) -> Result<Vec<Detection>>;

    /// Short name for logs
    fn name(&self) -> &str {
        "segmenter"
    }
}

impl<S: FlowerSegmenter + ?Sized> FlowerSegmenter for Box<S> {
    fn segment(&self, image: &RgbImage, confidence_threshold: f32) -> Result<Vec<Detection>> {
        (**self).segment(image, confidence_threshold)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Treats the whole frame as the flower
///
/// Used when no segmentation model is available; the classifier then sees the
/// unmasked photo.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullFrameSegmenter;

impl FlowerSegmenter for FullFrameSegmenter {
    fn segment(&self, image: &RgbImage, _confidence_threshold: f32) -> Result<Vec<Detection>> {
        Ok(vec![Detection::full_frame(1.0, image.width(), image.height())])
    }

    fn name(&self) -> &str {
        "full-frame"
    }
}

/// Index of the most confident detection; ties keep the earliest
pub fn select_best(detections: &[Detection]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, det) in detections.iter().enumerate() {
        match best {
            Some((_, conf)) if det.confidence <= conf => {}
            _ => best = Some((i, det.confidence)),
        }
    }
    best.map(|(i, _)| i)
}
