//! Inference module
//!
//! - `segmentation`: the segmenter trait, detections and best-detection selection
//! - `preprocess`: mask the background and build the classifier input
//! - `predictor`: checkpoint + segmenter + label tables, photo in, names out
//! - `onnx`: YOLOv8-seg segmenter on ONNX Runtime (feature `onnx`)

#[cfg(feature = "onnx")]
pub mod onnx;
pub mod predictor;
pub mod preprocess;
pub mod segmentation;

#[cfg(feature = "onnx")]
pub use onnx::YoloSegmenter;
pub use predictor::{FlowerPrediction, FlowerPredictor};
pub use preprocess::{load_rgb, Prepared, SegmentationPreprocessor};
pub use segmentation::{select_best, Detection, FlowerSegmenter, FullFrameSegmenter, Mask};
