//! Model module
//!
//! - `backbone`: staged convolutional feature extractor
//! - `classifier`: dual-head (species, color) classifier with an explicit mode tag
//! - `freeze`: trainability visitors and mappers

pub mod backbone;
pub mod classifier;
pub mod freeze;

pub use backbone::{BackboneStage, FlowerBackbone, FlowerBackboneConfig, MIN_INPUT_SIZE};
pub use classifier::{ClassifierHead, DualHeadClassifier, DualHeadClassifierConfig, ModelMode};
pub use freeze::{RunningStats, TrainabilityCensus};
