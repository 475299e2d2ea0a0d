//! Error types for the inference service.

use thiserror::Error;

/// Result type used across the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The upload could not be decoded or resized
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// The classifier picked an index with no class name behind it
    #[error("Predicted index {index} is outside the {num_labels} known labels")]
    OutOfRangeLabel { index: usize, num_labels: usize },

    /// Model, labels, knowledge store or profile could not be loaded
    #[error("Startup failure: {0}")]
    StartupFailure(String),

    /// The forward pass itself failed
    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Classifier returned an empty probability vector")]
    EmptyOutput,

    #[error("Classifier returned a non-finite score")]
    NonFiniteOutput,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub fn startup(msg: impl Into<String>) -> Self {
        Error::StartupFailure(msg.into())
    }
}

impl From<ort::Error> for Error {
    fn from(e: ort::Error) -> Self {
        Error::Inference(e.to_string())
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(e: ndarray::ShapeError) -> Self {
        Error::Inference(format!("shape error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_message_names_both_sides() {
        let e = Error::OutOfRangeLabel { index: 10, num_labels: 5 };
        assert_eq!(e.to_string(), "Predicted index 10 is outside the 5 known labels");
    }

    #[test]
    fn startup_helper_wraps_message() {
        let e = Error::startup("missing model");
        assert!(matches!(&e, Error::StartupFailure(m) if m == "missing model"));
        assert_eq!(e.to_string(), "Startup failure: missing model");
    }
}
