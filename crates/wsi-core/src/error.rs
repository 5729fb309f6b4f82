//! Error types for the whole-slide image pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the WSI pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding error
    #[error("Image processing error: {0}")]
    Image(String),

    /// Slide index CSV could not be parsed
    #[error("CSV error: {0}")]
    Csv(String),

    /// Configuration error, fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Batch, shuffle or dataset index outside its valid range
    #[error("Index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Sample label outside the declared class range
    #[error("Label {label} out of range for {num_classes} classes")]
    LabelOutOfRange { label: usize, num_classes: usize },

    /// A slide kept failing until the retry policy gave up
    #[error("Giving up on dataset index {index} ({path}) after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        index: usize,
        path: PathBuf,
        attempts: u32,
        last_error: String,
    },

    /// Model construction or inference error
    #[error("Model error: {0}")]
    Model(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested feature is not available
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Whether a driver may skip the failing unit of work and carry on.
    ///
    /// Only retry exhaustion qualifies; index, label and configuration
    /// errors indicate misuse or broken inputs.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::RetriesExhausted { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Csv(err.to_string())
    }
}

/// Specialized Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
