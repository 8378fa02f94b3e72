use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    io::paths::workspace_root,
    types::{DevicePreference, OutputFormat},
};

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
pub const DEFAULT_CLEANUP_RETENTION_SECS: u64 = 60 * 60;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30 * 60;

/// Settings for the HTTP service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind: String,
    pub workspace_root: PathBuf,
    pub max_upload_bytes: usize,
    /// Empty means the registry default.
    pub default_model: String,
    pub default_device: DevicePreference,
    pub default_format: OutputFormat,
    pub cleanup_retention_secs: u64,
    pub request_timeout_secs: u64,
    /// `None` keeps every loaded model for the life of the process.
    pub model_cache_capacity: Option<usize>,
    pub manifest_url_override: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            workspace_root: workspace_root(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            default_model: String::new(),
            default_device: DevicePreference::Auto,
            default_format: OutputFormat::Wav,
            cleanup_retention_secs: DEFAULT_CLEANUP_RETENTION_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            model_cache_capacity: None,
            manifest_url_override: None,
        }
    }
}

impl ServiceConfig {
    /// Clamps values that would make the service unusable.
    pub fn validate(mut self) -> Self {
        if self.max_upload_bytes == 0 {
            tracing::warn!("max_upload_bytes of 0 replaced with default");
            self.max_upload_bytes = DEFAULT_MAX_UPLOAD_BYTES;
        }
        if self.request_timeout_secs == 0 {
            tracing::warn!("request_timeout_secs of 0 replaced with default");
            self.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT_SECS;
        }
        if self.model_cache_capacity == Some(0) {
            self.model_cache_capacity = None;
        }
        self.default_model = self.default_model.trim().to_string();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cleanup_retention(&self) -> Duration {
        Duration::from_secs(self.cleanup_retention_secs)
    }
}
