use crate::{
    error::{Result, StemError},
    types::{Device, DevicePreference},
};

/// Maps a requested [`DevicePreference`] to a concrete [`Device`].
///
/// `auto` falls back to CPU silently. An explicit `gpu` without an
/// accelerator is an error, never a quiet downgrade.
#[derive(Debug, Clone, Copy)]
pub struct DeviceResolver {
    accelerator: bool,
}

impl DeviceResolver {
    /// Probes ONNX Runtime for a usable accelerator once.
    pub fn detect() -> Self {
        let accelerator = crate::core::engine::accelerator_available();
        tracing::info!(accelerator, "device probe");
        Self { accelerator }
    }

    pub fn with_accelerator(accelerator: bool) -> Self {
        Self { accelerator }
    }

    pub fn accelerator_available(&self) -> bool {
        self.accelerator
    }

    pub fn resolve(&self, preference: DevicePreference) -> Result<Device> {
        match preference {
            DevicePreference::Cpu => Ok(Device::Cpu),
            DevicePreference::Auto if self.accelerator => Ok(Device::Gpu),
            DevicePreference::Auto => Ok(Device::Cpu),
            DevicePreference::Gpu if self.accelerator => Ok(Device::Gpu),
            DevicePreference::Gpu => Err(StemError::DeviceUnavailable(
                "gpu requested but no accelerator is available".into(),
            )),
        }
    }
}
