//! Dataset module
//!
//! - `manifest`: CSV manifest of (image path, species, color) samples
//! - `burn_dataset`: in-memory Burn dataset and the two-label batcher
//! - `split`: hold-out and k-fold index splits

pub mod burn_dataset;
pub mod manifest;
pub mod split;

pub use burn_dataset::{FlowerBatch, FlowerBatcher, FlowerDataset, FlowerItem};
pub use manifest::{Sample, SampleManifest};
pub use split::{hold_out, k_fold, make_splits, FoldSplit};
