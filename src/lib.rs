//! # stem-splitter
//!
//! Job orchestration for audio stem separation: device selection, model
//! instance caching, per-job workspaces, single and batch execution, and
//! archive packaging. Served over HTTP by `stem-splitter-server` and driven
//! from the command line by `stem-splitter`.

pub mod api;
pub mod config;
pub mod error;
pub mod types;

pub mod core {
    pub mod audio;
    pub mod batch;
    pub mod device;
    pub mod dsp;
    pub mod engine;
    pub mod executor;
    pub mod packager;
    pub mod separator;
}

pub mod model {
    pub mod backend;
    pub mod cache;
    pub mod model_manager;
    pub mod registry;
}

pub mod io {
    pub mod crypto;
    pub mod net;
    pub mod paths;
    pub mod progress;
    pub mod workspace;
}

use std::sync::Arc;

// Public API
pub use crate::core::audio::{read_audio, write_audio};
pub use crate::core::batch::{
    publish_batch, BatchEntry, BatchManifest, BatchOutcome, BatchResult, ItemOutcome, ItemStatus,
    ManifestEntry,
};
pub use crate::core::device::DeviceResolver;
pub use crate::core::engine::{OrtModel, OrtModelLoader};
pub use crate::core::packager::{copy_stems, package};
pub use crate::core::separator::Separator;
pub use crate::error::{Result, StemError};
pub use crate::io::progress::{
    set_download_progress_callback, set_split_progress_callback, SplitProgress,
};
pub use crate::io::workspace::{PurgeReport, Workspace, WorkspaceGuard, WorkspaceManager};
pub use crate::model::backend::{ModelLoader, SharedModel, StemModel};
pub use crate::model::cache::ModelCache;
pub use crate::model::model_manager::{ensure_model, ModelHandle};
pub use crate::types::{
    AudioData, Device, DevicePreference, ModelManifest, OutputFormat, SeparationRequest,
    StemLabel, StemSet,
};

/// A separator backed by the bundled registry and ONNX Runtime.
pub fn ort_separator(
    manifest_url_override: Option<String>,
    model_cache_capacity: Option<usize>,
) -> Result<Separator> {
    let loader = OrtModelLoader::new(manifest_url_override)?;
    let cache = ModelCache::new(Arc::new(loader)).with_capacity_limit(model_cache_capacity);
    Ok(Separator::new(DeviceResolver::detect(), Arc::new(cache)))
}

/// Downloads, verifies and loads `model_name` once so later jobs start warm.
pub fn prepare_model(
    model_name: &str,
    manifest_url_override: Option<&str>,
    preference: DevicePreference,
) -> Result<Device> {
    let loader = OrtModelLoader::new(manifest_url_override.map(str::to_owned))?;
    let model_name = loader.resolve(model_name)?;
    let device = DeviceResolver::detect().resolve(preference)?;
    loader.load(&model_name, device)?;
    Ok(device)
}
