//! Burn Dataset Integration
//!
//! Implements Burn's Dataset trait and Batcher for the flower samples. Images
//! are decoded once, up front, on a rayon pool and kept in memory as CHW `f32`
//! arrays in [0, 1]. The batcher applies ImageNet normalization.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::info;

use crate::dataset::manifest::Sample;
use crate::utils::error::{FloraError, Result};
use crate::{IMAGENET_MEAN, IMAGENET_STD};

/// A single flower photo ready for Burn
#[derive(Clone, Debug)]
pub struct FlowerItem {
    /// Image data as flattened CHW float array [3 * H * W]
    pub image: Vec<f32>,
    pub species: usize,
    pub color: usize,
    /// Image path (for debugging/logging)
    pub path: String,
}

impl FlowerItem {
    /// Load an image, convert it to RGB, resize it (bilinear) and scale to [0, 1]
    pub fn from_path(path: &Path, species: usize, color: usize, image_size: usize) -> Result<Self> {
        let img = ImageReader::open(path)
            .map_err(|e| FloraError::ImageLoad(path.to_path_buf(), e.to_string()))?
            .with_guessed_format()
            .map_err(|e| FloraError::ImageLoad(path.to_path_buf(), e.to_string()))?
            .decode()
            .map_err(|e| FloraError::ImageLoad(path.to_path_buf(), e.to_string()))?
            .resize_exact(image_size as u32, image_size as u32, FilterType::Triangle)
            .to_rgb8();

        Ok(Self {
            image: rgb_to_chw(&img),
            species,
            color,
            path: path.to_string_lossy().to_string(),
        })
    }

    /// Create from pre-loaded image data
    pub fn from_data(image: Vec<f32>, species: usize, color: usize, path: String) -> Self {
        Self {
            image,
            species,
            color,
            path,
        }
    }
}

/// Convert an RGB image to a flattened CHW array scaled to [0, 1]
pub fn rgb_to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let plane = height * width;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        data[offset] = pixel[0] as f32 / 255.0;
        data[plane + offset] = pixel[1] as f32 / 255.0;
        data[2 * plane + offset] = pixel[2] as f32 / 255.0;
    }

    data
}

/// Apply ImageNet normalization: (x - mean) / std, per channel
pub fn imagenet_normalize<B: Backend>(images: Tensor<B, 4>) -> Tensor<B, 4> {
    let device = images.device();
    let mean = Tensor::<B, 4>::from_floats(TensorData::new(IMAGENET_MEAN.to_vec(), [1, 3, 1, 1]), &device);
    let std = Tensor::<B, 4>::from_floats(TensorData::new(IMAGENET_STD.to_vec(), [1, 3, 1, 1]), &device);

    (images - mean) / std
}

/// In-memory flower dataset implementing Burn's Dataset trait
#[derive(Debug, Clone)]
pub struct FlowerDataset {
    items: Vec<FlowerItem>,
    image_size: usize,
}

impl FlowerDataset {
    /// Decode every sample on a pool of `num_workers` threads
    ///
    /// A single unreadable image fails the whole load.
    pub fn new_cached(samples: &[Sample], image_size: usize, num_workers: usize) -> Result<Self> {
        let total = samples.len();
        info!("Pre-loading {} images into memory ({} workers)", total, num_workers);

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .build()
            .map_err(|e| FloraError::Dataset(format!("Failed to build loader pool: {}", e)))?;

        let loaded = AtomicUsize::new(0);

        let items: Result<Vec<FlowerItem>> = pool.install(|| {
            samples
                .par_iter()
                .map(|sample| {
                    let item = FlowerItem::from_path(
                        &sample.image_path,
                        sample.species,
                        sample.color,
                        image_size,
                    );
                    let count = loaded.fetch_add(1, Ordering::Relaxed);
                    if count % 100 == 0 {
                        pb.set_position(count as u64);
                    }
                    item
                })
                .collect()
        });

        let items = items?;
        pb.finish_with_message(format!("Loaded {} images", items.len()));
        info!("Loaded {} images", items.len());

        Ok(Self { items, image_size })
    }

    /// Build a dataset from already decoded items
    pub fn from_items(items: Vec<FlowerItem>, image_size: usize) -> Self {
        Self { items, image_size }
    }

    /// Items at `indices`, without decoding anything again
    pub fn subset(&self, indices: &[usize]) -> Self {
        let items = indices
            .iter()
            .filter_map(|&i| self.items.get(i).cloned())
            .collect();
        Self {
            items,
            image_size: self.image_size,
        }
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }
}

impl Dataset<FlowerItem> for FlowerDataset {
    fn get(&self, index: usize) -> Option<FlowerItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of flower photos with both label vectors
#[derive(Clone, Debug)]
pub struct FlowerBatch<B: Backend> {
    /// Batch of images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Species ids with shape [batch_size]
    pub species: Tensor<B, 1, Int>,
    /// Color ids with shape [batch_size]
    pub colors: Tensor<B, 1, Int>,
}

/// Batcher for flower batches
#[derive(Clone, Debug)]
pub struct FlowerBatcher {
    image_size: usize,
}

impl FlowerBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, FlowerItem, FlowerBatch<B>> for FlowerBatcher {
    fn batch(&self, items: Vec<FlowerItem>, device: &B::Device) -> FlowerBatch<B> {
        let batch_size = items.len();
        let channels = 3;
        let height = self.image_size;
        let width = self.image_size;

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, channels, height, width]),
            device,
        );
        let images = imagenet_normalize(images);

        let species_data: Vec<i64> = items.iter().map(|item| item.species as i64).collect();
        let color_data: Vec<i64> = items.iter().map(|item| item.color as i64).collect();

        let species =
            Tensor::<B, 1, Int>::from_data(TensorData::new(species_data, [batch_size]), device);
        let colors =
            Tensor::<B, 1, Int>::from_data(TensorData::new(color_data, [batch_size]), device);

        FlowerBatch {
            images,
            species,
            colors,
        }
    }
}
