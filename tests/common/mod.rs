#![allow(dead_code)]

use std::{
    f32::consts::PI,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use stem_splitter::{
    error::{Result, StemError},
    model::cache::ModelCache,
    types::{AudioData, Device, StemWaveforms},
    DeviceResolver, ModelLoader, Separator, SharedModel, StemModel,
};

pub const MODEL_RATE: u32 = 44_100;

/// Short stereo sine written as 16-bit WAV.
pub fn write_sine_wav(path: &Path, sample_rate: u32, channels: u16, seconds: f32) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut w = hound::WavWriter::create(path, spec).unwrap();
    let frames = (sample_rate as f32 * seconds) as usize;
    for i in 0..frames {
        let s = (2.0 * PI * 440.0 * i as f32 / sample_rate as f32).sin() * 0.4;
        for _ in 0..channels {
            w.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
    }
    w.finalize().unwrap();
}

/// Splits the input into four scaled copies. Optionally reports OOM when bound
/// to the accelerator.
pub struct ScalingModel {
    pub name: String,
    pub device: Device,
    pub oom_on_gpu: bool,
    pub calls: AtomicUsize,
}

impl StemModel for ScalingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> Device {
        self.device
    }

    fn sample_rate(&self) -> u32 {
        MODEL_RATE
    }

    fn separate(&self, input: &AudioData) -> Result<StemWaveforms> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.oom_on_gpu && self.device == Device::Gpu {
            return Err(StemError::DeviceOom {
                device: Device::Gpu,
                message: "CUDA failure 2: out of memory".into(),
            });
        }
        assert_eq!(input.channels, 2);
        assert_eq!(input.sample_rate, MODEL_RATE);
        let scaled = |g: f32| input.samples.iter().map(|s| s * g).collect::<Vec<f32>>();
        Ok(StemWaveforms {
            sample_rate: MODEL_RATE,
            channels: 2,
            vocals: scaled(0.4),
            drums: scaled(0.3),
            bass: scaled(0.2),
            other: scaled(0.1),
        })
    }
}

#[derive(Default)]
pub struct MockLoader {
    pub loads: AtomicUsize,
    pub load_delay: Option<Duration>,
    pub fail_on: Option<Device>,
    pub oom_on_gpu: bool,
}

impl MockLoader {
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader for MockLoader {
    fn default_model(&self) -> String {
        "htdemucs".into()
    }

    fn available_models(&self) -> Vec<String> {
        vec!["htdemucs".into(), "htdemucs_ort_v1".into()]
    }

    fn resolve(&self, model_name: &str) -> Result<String> {
        let name = if model_name.is_empty() {
            self.default_model()
        } else {
            model_name.to_string()
        };
        if self.available_models().contains(&name) {
            Ok(name)
        } else {
            Err(StemError::ModelNotFound(name))
        }
    }

    fn load(&self, model_name: &str, device: Device) -> Result<SharedModel> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }
        if self.fail_on == Some(device) {
            return Err(StemError::ModelLoad {
                model: model_name.into(),
                device,
                reason: "corrupt weights".into(),
            });
        }
        Ok(Arc::new(ScalingModel {
            name: model_name.into(),
            device,
            oom_on_gpu: self.oom_on_gpu,
            calls: AtomicUsize::new(0),
        }))
    }
}

pub fn mock_separator(loader: Arc<MockLoader>, accelerator: bool) -> Separator {
    let cache = ModelCache::new(loader);
    Separator::new(DeviceResolver::with_accelerator(accelerator), Arc::new(cache))
}
