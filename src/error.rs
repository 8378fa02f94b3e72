use thiserror::Error;

use crate::types::Device;

/// Central error type for the stem-splitter crate.
#[derive(Debug, Error)]
pub enum StemError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    /// Missing or corrupt file, unsupported format, malformed request.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model `{0}` not found in registry")]
    ModelNotFound(String),

    #[error("Failed to load model `{model}` on {device}: {reason}")]
    ModelLoad {
        model: String,
        device: Device,
        reason: String,
    },

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The accelerator ran out of memory mid-run. Callers may retry on CPU.
    #[error("Out of memory on {device}: {message}")]
    DeviceOom { device: Device, message: String },

    #[error("Separation failed: {0}")]
    Separation(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Checksum mismatch for {path}")]
    Checksum { path: String },

    #[error("Cache dir not available")]
    CacheDirUnavailable,
}

impl StemError {
    /// Only accelerator OOM is worth a second attempt on another device.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StemError::DeviceOom { .. })
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        StemError::InvalidInput(msg.into())
    }
}

// --- Implement From conversions for common errors ---
impl From<std::io::Error> for StemError {
    fn from(e: std::io::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<serde_json::Error> for StemError {
    fn from(e: serde_json::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<reqwest::Error> for StemError {
    fn from(e: reqwest::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<hex::FromHexError> for StemError {
    fn from(e: hex::FromHexError) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<ort::Error> for StemError {
    fn from(e: ort::Error) -> Self {
        StemError::Anyhow(anyhow::anyhow!("onnxruntime: {e}"))
    }
}

impl From<zip::result::ZipError> for StemError {
    fn from(e: zip::result::ZipError) -> Self {
        StemError::Anyhow(e.into())
    }
}

pub type Result<T> = std::result::Result<T, StemError>;
