use std::sync::Arc;

use crate::{
    error::Result,
    types::{AudioData, Device, StemWaveforms},
};

/// A loaded separation model bound to one device.
///
/// Implementations must tolerate concurrent `separate` calls; the ONNX
/// implementation serialises them on its session lock.
pub trait StemModel: Send + Sync {
    fn name(&self) -> &str;

    fn device(&self) -> Device;

    /// Rate the model expects its input at.
    fn sample_rate(&self) -> u32;

    /// `input` is interleaved stereo at [`StemModel::sample_rate`].
    fn separate(&self, input: &AudioData) -> Result<StemWaveforms>;
}

pub type SharedModel = Arc<dyn StemModel>;

/// Knows which models exist and how to build an instance of one.
pub trait ModelLoader: Send + Sync {
    fn default_model(&self) -> String;

    fn available_models(&self) -> Vec<String>;

    /// Maps a requested name (empty means default) to its canonical name, or
    /// `ModelNotFound`. Must not touch the network or load anything.
    fn resolve(&self, model_name: &str) -> Result<String>;

    /// The expensive part. Called at most once per `(model, device)` by the cache.
    fn load(&self, model_name: &str, device: Device) -> Result<SharedModel>;
}
