//! Sample manifest
//!
//! The dataset is described by a CSV file with one row per photo:
//!
//! ```text
//! image_path,species,color
//! images/rose_001.jpg,rose,red
//! ```
//!
//! Label names are encoded through the run's [`LabelSet`]; an unknown name is
//! a data error. Relative image paths resolve against the manifest's directory.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::labels::LabelSet;
use crate::utils::error::{FloraError, Result};

/// One labeled photo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub image_path: PathBuf,
    pub species: usize,
    pub color: usize,
}

#[derive(Debug, Deserialize)]
struct ManifestRow {
    image_path: String,
    species: String,
    color: String,
}

/// Parsed dataset manifest
#[derive(Debug, Clone)]
pub struct SampleManifest {
    pub samples: Vec<Sample>,
}

impl SampleManifest {
    /// Read and encode every row of a manifest CSV
    pub fn from_csv(path: &Path, labels: &LabelSet) -> Result<Self> {
        if !path.exists() {
            return Err(FloraError::PathNotFound(path.to_path_buf()));
        }

        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;

        let mut samples = Vec::new();
        for (line, row) in reader.deserialize::<ManifestRow>().enumerate() {
            let row = row?;
            let species = labels.species.encode(&row.species)?;
            let color = labels.colors.encode(&row.color)?;

            let image_path = PathBuf::from(&row.image_path);
            let image_path = if image_path.is_absolute() {
                image_path
            } else {
                base_dir.join(image_path)
            };

            debug!("manifest row {}: {:?} -> ({}, {})", line + 1, image_path, species, color);
            samples.push(Sample {
                image_path,
                species,
                color,
            });
        }

        if samples.is_empty() {
            return Err(FloraError::Dataset(format!(
                "manifest {:?} contains no samples",
                path
            )));
        }

        info!("Loaded {} samples from {:?}", samples.len(), path);
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples at the given indices, in index order
    pub fn select(&self, indices: &[usize]) -> Vec<Sample> {
        indices
            .iter()
            .filter_map(|&i| self.samples.get(i).cloned())
            .collect()
    }

    /// Per-class sample counts for the species and color heads
    pub fn class_distribution(&self, num_species: usize, num_colors: usize) -> (Vec<usize>, Vec<usize>) {
        let mut species = vec![0usize; num_species];
        let mut colors = vec![0usize; num_colors];
        for sample in &self.samples {
            if let Some(count) = species.get_mut(sample.species) {
                *count += 1;
            }
            if let Some(count) = colors.get_mut(sample.color) {
                *count += 1;
            }
        }
        (species, colors)
    }
}
