//! ONNX Runtime backend for hybrid Demucs graphs.

use crate::{
    core::dsp::{interleave_stereo, to_planar_stereo, StereoStft},
    error::{Result, StemError},
    io::progress::{emit_split_progress, SplitProgress},
    model::{
        backend::{ModelLoader, SharedModel, StemModel},
        model_manager::{ensure_model, ModelHandle},
        registry::Registry,
    },
    types::{AudioData, Device, ModelManifest, StemWaveforms},
};

use anyhow::{anyhow, Context};
use ndarray::Array3;
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::{Tensor, Value},
};
use std::{collections::HashMap, sync::Arc, sync::Mutex};

const DEMUCS_NFFT: usize = 4096;
const DEMUCS_HOP: usize = 1024;
const TIME_INPUT: &str = "input";
const SPEC_INPUT: &str = "x";
const TIME_OUTPUT: &str = "add_67";

/// Whether ONNX Runtime can hand out a CUDA session on this machine.
pub fn accelerator_available() -> bool {
    match CUDAExecutionProvider::default().is_available() {
        Ok(available) => available,
        Err(e) => {
            tracing::debug!(error = %e, "cuda probe failed");
            false
        }
    }
}

/// Accelerator allocation failures surface through ORT as plain strings.
fn is_oom_message(msg: &str) -> bool {
    let m = msg.to_ascii_lowercase();
    m.contains("out of memory")
        || m.contains("cuda_error_out_of_memory")
        || m.contains("cudaerrormemoryallocation")
        || m.contains("failed to allocate memory")
        || m.contains("bfcarena")
}

fn classify_run_error(e: ort::Error, device: Device) -> StemError {
    let msg = e.to_string();
    if device == Device::Gpu && is_oom_message(&msg) {
        StemError::DeviceOom {
            device,
            message: msg,
        }
    } else {
        StemError::Separation(format!("inference failed: {msg}"))
    }
}

pub struct OrtModel {
    name: String,
    device: Device,
    manifest: ModelManifest,
    session: Mutex<Session>,
    stft: StereoStft,
}

impl OrtModel {
    pub fn load(handle: &ModelHandle, device: Device) -> Result<Self> {
        let mf = &handle.manifest;
        if !(mf.window > 0 && mf.hop > 0 && mf.hop <= mf.window) {
            return Err(StemError::Manifest("Bad win/hop in manifest".into()));
        }

        let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
        if device == Device::Gpu {
            builder = builder.with_execution_providers([CUDAExecutionProvider::default()
                .build()
                .error_on_failure()])?;
        }
        let session = builder.commit_from_file(&handle.local_path)?;

        for required in [TIME_INPUT, SPEC_INPUT] {
            if !session.inputs.iter().any(|i| i.name == required) {
                return Err(StemError::Manifest(format!("Model missing input '{required}'")));
            }
        }

        Ok(Self {
            name: mf.name.clone(),
            device,
            manifest: mf.clone(),
            session: Mutex::new(session),
            stft: StereoStft::new(DEMUCS_NFFT, DEMUCS_HOP),
        })
    }

    pub fn manifest(&self) -> &ModelManifest {
        &self.manifest
    }

    /// One model window: `[4, 2, T]` stems for `T` input samples.
    fn run_window(&self, left: &[f32], right: &[f32]) -> Result<Array3<f32>> {
        if left.len() != right.len() {
            return Err(anyhow!("L/R length mismatch").into());
        }
        let t = left.len();

        // Time branch [1,2,T], planar
        let mut planar = Vec::with_capacity(2 * t);
        planar.extend_from_slice(left);
        planar.extend_from_slice(right);
        let time_value: Value = Tensor::from_array((vec![1, 2, t], planar))?.into_dyn();

        // Spec branch [1,4,F,Frames]
        let (spec_cac, f_bins, frames) = self.stft.cac_centered(left, right);
        let spec_value: Value = Tensor::from_array((vec![1, 4, f_bins, frames], spec_cac))
            .context("spec tensor")?
            .into_dyn();

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("session lock poisoned"))?;

        let outputs = session
            .run(vec![
                (TIME_INPUT.to_string(), time_value),
                (SPEC_INPUT.to_string(), spec_value),
            ])
            .map_err(|e| classify_run_error(e, self.device))?;

        let out_td: Value = outputs
            .into_iter()
            .find_map(|(name, v)| if name == TIME_OUTPUT { Some(v) } else { None })
            .ok_or_else(|| anyhow!("Model did not return '{TIME_OUTPUT}' output"))?;

        let (_shape, data) = out_td.try_extract_tensor::<f32>()?;
        if data.len() != 4 * 2 * t {
            return Err(anyhow!(
                "Unexpected {TIME_OUTPUT} length {} (expected {})",
                data.len(),
                4 * 2 * t
            )
            .into());
        }
        let out = Array3::from_shape_vec((4, 2, t), data.to_vec()).map_err(|e| anyhow!(e))?;
        Ok(out)
    }
}

impl StemModel for OrtModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> Device {
        self.device
    }

    fn sample_rate(&self) -> u32 {
        self.manifest.sample_rate
    }

    fn separate(&self, input: &AudioData) -> Result<StemWaveforms> {
        let stereo = to_planar_stereo(&input.samples, input.channels);
        let n = stereo.len();
        if n == 0 {
            return Err(StemError::invalid_input("Empty audio"));
        }

        let win = self.manifest.window;
        let hop = self.manifest.hop;
        let total_chunks = if n <= win { 1 } else { 1 + (n - win).div_ceil(hop) };

        let mut left_raw = vec![0f32; win];
        let mut right_raw = vec![0f32; win];
        let mut acc: Vec<Vec<[f32; 2]>> = vec![vec![[0f32; 2]; n]; 4];

        let mut pos = 0usize;
        let mut done = 0usize;
        while pos < n {
            for i in 0..win {
                let (l, r) = stereo.get(pos + i).map(|f| (f[0], f[1])).unwrap_or((0.0, 0.0));
                left_raw[i] = l;
                right_raw[i] = r;
            }

            let out = self.run_window(&left_raw, &right_raw)?;

            // Later windows overwrite the overlap of earlier ones.
            let copy_len = win.min(n - pos);
            for (st, stem_acc) in acc.iter_mut().enumerate() {
                for i in 0..copy_len {
                    stem_acc[pos + i] = [out[(st, 0, i)], out[(st, 1, i)]];
                }
            }

            done += 1;
            emit_split_progress(SplitProgress::Chunks {
                done,
                total: total_chunks,
                percent: done as f32 / total_chunks as f32 * 100.0,
            });

            if pos + win >= n {
                break;
            }
            pos += hop;
        }

        let names: Vec<String> = if self.manifest.stems.is_empty() {
            vec!["vocals".into(), "drums".into(), "bass".into(), "other".into()]
        } else {
            self.manifest.stems.clone()
        };
        let name_idx: HashMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_lowercase(), i))
            .collect();
        let pick = |key: &str, fallback: usize| -> Vec<f32> {
            let idx = name_idx.get(key).copied().unwrap_or(fallback).min(3);
            interleave_stereo(&acc[idx])
        };

        Ok(StemWaveforms {
            sample_rate: self.manifest.sample_rate,
            channels: 2,
            vocals: pick("vocals", 0),
            drums: pick("drums", 1),
            bass: pick("bass", 2),
            other: pick("other", 3),
        })
    }
}

/// Registry-backed loader producing [`OrtModel`] instances.
pub struct OrtModelLoader {
    registry: Registry,
    manifest_url_override: Option<String>,
}

impl OrtModelLoader {
    pub fn new(manifest_url_override: Option<String>) -> Result<Self> {
        Ok(Self {
            registry: Registry::bundled()?,
            manifest_url_override,
        })
    }
}

impl ModelLoader for OrtModelLoader {
    fn default_model(&self) -> String {
        self.registry.default.clone()
    }

    fn available_models(&self) -> Vec<String> {
        self.registry.names()
    }

    fn resolve(&self, model_name: &str) -> Result<String> {
        self.registry.canonical_name(model_name)
    }

    fn load(&self, model_name: &str, device: Device) -> Result<SharedModel> {
        emit_split_progress(SplitProgress::Stage("resolve_model"));
        let handle = ensure_model(model_name, self.manifest_url_override.as_deref())?;
        emit_split_progress(SplitProgress::Stage("engine_preload"));
        let model = OrtModel::load(&handle, device).map_err(|e| StemError::ModelLoad {
            model: model_name.to_string(),
            device,
            reason: e.to_string(),
        })?;
        Ok(Arc::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oom_messages_are_recognised() {
        assert!(is_oom_message("CUDA failure 2: out of memory"));
        assert!(is_oom_message(
            "BFCArena::AllocateRawInternal Failed to allocate memory for requested buffer"
        ));
        assert!(!is_oom_message("Invalid input name: foo"));
    }
}
