//! Central error types for net-surgery.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SurgeryError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Checkpoint version {0} not supported")]
    UnsupportedVersion(u32),

    #[error("Tensor {name}: unsupported tensor type {tensor_type} (only F32 is supported)")]
    UnsupportedTensorType { name: String, tensor_type: u32 },

    #[error("Layer '{0}' not found")]
    MissingLayer(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Shape mismatch in layer '{layer}': expected {expected} elements, got {actual}")]
    ShapeMismatch {
        layer: String,
        expected: usize,
        actual: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
