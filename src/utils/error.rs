//! Error Handling Module
//!
//! Error taxonomy for IO-dataset construction and semi-supervised training.
//! Every variant is fatal for the current run; degenerate-but-valid states
//! (an empty validation stream) are reported as sentinel values instead.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the info_nas library
#[derive(Error, Debug)]
pub enum InfoNasError {
    /// Parallel sequences disagree in length while building an IO dataset
    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// A training batch is neither unlabeled (2 parts) nor labeled
    #[error("Batch of arity {arity} is neither unlabeled (2) nor labeled ({labeled_len})")]
    BatchArity { arity: usize, labeled_len: usize },

    /// A model forward pass produced the wrong number of outputs
    #[error("Model output arity mismatch: expected {expected} elements, got {actual}")]
    ModelOutputArity { expected: usize, actual: usize },

    /// A required configuration key is absent or names an unknown registry entry
    #[error("Configuration key error: {0}")]
    ConfigurationKey(String),

    /// A selected layer index does not exist in the network's layer list
    #[error("{kind} index {index} out of range for {len} layers")]
    IndexOutOfRange {
        kind: &'static str,
        index: isize,
        len: usize,
    },

    /// Configuration value is present but invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error with dataset operations
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Failure to record or restore model/optimizer state
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

/// Convenience Result type for info_nas operations
pub type Result<T> = std::result::Result<T, InfoNasError>;

impl From<serde_json::Error> for InfoNasError {
    fn from(e: serde_json::Error) -> Self {
        InfoNasError::Serialization(e.to_string())
    }
}

impl From<burn::record::RecorderError> for InfoNasError {
    fn from(e: burn::record::RecorderError) -> Self {
        InfoNasError::Checkpoint(format!("{:?}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InfoNasError::Dataset("test error".to_string());
        assert_eq!(format!("{}", err), "Dataset error: test error");
    }

    #[test]
    fn test_batch_arity_display() {
        let err = InfoNasError::BatchArity {
            arity: 3,
            labeled_len: 4,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("arity 3"));
        assert!(msg.contains("labeled (4)"));
    }

    #[test]
    fn test_index_out_of_range_display() {
        let err = InfoNasError::IndexOutOfRange {
            kind: "nth_output",
            index: -9,
            len: 4,
        };
        assert_eq!(format!("{}", err), "nth_output index -9 out of range for 4 layers");
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));

        let with_context = result.context("Failed to read file");
        assert!(matches!(with_context, Err(InfoNasError::InvalidInput(_))));
    }

    #[test]
    fn test_option_context() {
        let opt: Option<i32> = None;
        let with_context = opt.with_context(|| "Value was None".to_string());
        assert!(with_context.is_err());
    }
}
