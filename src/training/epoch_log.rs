//! Structured per-epoch CSV log
//!
//! One header row, then one row per epoch. Every row is flushed as soon as it
//! is written so a crashed run still leaves its history on disk.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::training::accumulator::PassSummary;
use crate::utils::error::Result;

/// Column names, in file order
pub const EPOCH_LOG_COLUMNS: [&str; 10] = [
    "epoch",
    "train_loss",
    "train_species_acc",
    "train_color_acc",
    "val_loss",
    "val_species_acc",
    "val_color_acc",
    "species_f1",
    "color_f1",
    "avg_f1",
];

/// One row of the epoch log
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_species_acc: f64,
    pub train_color_acc: f64,
    pub val_loss: f64,
    pub val_species_acc: f64,
    pub val_color_acc: f64,
    pub species_f1: f64,
    pub color_f1: f64,
    pub avg_f1: f64,
}

impl EpochRecord {
    pub fn new(epoch: usize, train: &PassSummary, valid: &PassSummary) -> Self {
        Self {
            epoch,
            train_loss: train.loss,
            train_species_acc: train.species_acc,
            train_color_acc: train.color_acc,
            val_loss: valid.loss,
            val_species_acc: valid.species_acc,
            val_color_acc: valid.color_acc,
            species_f1: valid.species_f1,
            color_f1: valid.color_f1,
            avg_f1: valid.avg_f1,
        }
    }
}

/// Append-only CSV writer for epoch records
pub struct EpochLog {
    writer: csv::Writer<File>,
    path: PathBuf,
}

impl EpochLog {
    /// Create (or truncate) the log file and write the header row
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        writer.write_record(EPOCH_LOG_COLUMNS)?;
        writer.flush()?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    /// Write one row and flush it
    pub fn append(&mut self, record: &EpochRecord) -> Result<()> {
        self.writer.serialize(record)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read an epoch log back
pub fn read_epoch_log(path: &Path) -> Result<Vec<EpochRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}
