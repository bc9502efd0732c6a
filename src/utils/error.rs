//! Crate error type
//!
//! A photo with no detectable flower is not an error: it is reported through
//! [`crate::inference::Prepared::NotFound`] and [`crate::inference::FlowerPrediction::NotFound`].

use std::path::PathBuf;

use thiserror::Error;

/// Every failure the library reports
#[derive(Error, Debug)]
pub enum FloraError {
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Manifest parsing, splits, empty folds
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Record load/save, shape mismatches
    #[error("Model error: {0}")]
    Model(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Segmentation error: {0}")]
    Segmentation(String),

    /// Raised before any work starts
    #[error("Configuration error: {0}")]
    Config(String),

    /// Name missing from a label table
    #[error("Unknown {table} label '{name}'")]
    UnknownLabel { table: &'static str, name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON config or summary (de)serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for FloraError {
    fn from(err: serde_json::Error) -> Self {
        FloraError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FloraError>;

/// Context for foreign errors and missing values, reported as [`FloraError::Model`]
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| FloraError::Model(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| FloraError::Model(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| FloraError::Model(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| FloraError::Model(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FloraError::Dataset("empty manifest".to_string());
        assert_eq!(format!("{}", err), "Dataset error: empty manifest");
    }

    #[test]
    fn test_unknown_label_display() {
        let err = FloraError::UnknownLabel {
            table: "species",
            name: "orchid".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown species label 'orchid'");
    }

    #[test]
    fn test_image_load_error() {
        let path = PathBuf::from("/photos/rose.jpg");
        let err = FloraError::ImageLoad(path, "file not found".to_string());
        assert!(format!("{}", err).contains("rose.jpg"));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let with_context = result.context("Failed to read checkpoint");
        assert!(with_context
            .unwrap_err()
            .to_string()
            .contains("Failed to read checkpoint"));
    }

    #[test]
    fn test_option_context() {
        let opt: Option<i32> = None;
        assert!(opt.context("Value was None").is_err());
    }
}
