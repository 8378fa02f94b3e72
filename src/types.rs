use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::error::{Result, StemError};

/// Input container formats accepted by both surfaces.
pub const SUPPORTED_INPUT_FORMATS: [&str; 5] = ["mp3", "wav", "flac", "m4a", "ogg"];

pub fn is_supported_input(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            SUPPORTED_INPUT_FORMATS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

#[derive(Clone, Debug)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioData {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemLabel {
    Vocals,
    Drums,
    Bass,
    Other,
}

impl StemLabel {
    /// Canonical order used for file naming, archive members and reports.
    pub const ALL: [StemLabel; 4] = [
        StemLabel::Vocals,
        StemLabel::Drums,
        StemLabel::Bass,
        StemLabel::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StemLabel::Vocals => "vocals",
            StemLabel::Drums => "drums",
            StemLabel::Bass => "bass",
            StemLabel::Other => "other",
        }
    }
}

impl fmt::Display for StemLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw separated audio as returned by a model, interleaved per stem.
#[derive(Clone, Debug)]
pub struct StemWaveforms {
    pub sample_rate: u32,
    pub channels: u16,
    pub vocals: Vec<f32>,
    pub drums: Vec<f32>,
    pub bass: Vec<f32>,
    pub other: Vec<f32>,
}

impl StemWaveforms {
    pub fn get(&self, label: StemLabel) -> &[f32] {
        match label {
            StemLabel::Vocals => &self.vocals,
            StemLabel::Drums => &self.drums,
            StemLabel::Bass => &self.bass,
            StemLabel::Other => &self.other,
        }
    }

    /// All four stems present, non-empty and of equal length.
    pub fn validate(&self) -> Result<()> {
        let expected = self.vocals.len();
        for label in StemLabel::ALL {
            let len = self.get(label).len();
            if len == 0 {
                return Err(StemError::Separation(format!("model produced an empty {label} stem")));
            }
            if len != expected {
                return Err(StemError::Separation(format!(
                    "stem length mismatch: {label} has {len} samples, vocals has {expected}"
                )));
            }
        }
        if self.channels == 0 || self.sample_rate == 0 {
            return Err(StemError::Separation("model output has no channel layout".into()));
        }
        Ok(())
    }

    pub fn as_audio(&self, label: StemLabel) -> AudioData {
        AudioData {
            samples: self.get(label).to_vec(),
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

/// A complete set of stem files for one source. Never partial.
#[derive(Clone, Debug, Serialize)]
pub struct StemSet {
    source: PathBuf,
    stems: BTreeMap<StemLabel, PathBuf>,
}

impl StemSet {
    pub fn new(source: impl Into<PathBuf>, stems: BTreeMap<StemLabel, PathBuf>) -> Result<Self> {
        for label in StemLabel::ALL {
            let path = stems
                .get(&label)
                .ok_or_else(|| StemError::Separation(format!("missing {label} stem")))?;
            let len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            if len == 0 {
                return Err(StemError::Separation(format!(
                    "{label} stem is empty or missing: {}",
                    path.display()
                )));
            }
        }
        Ok(Self {
            source: source.into(),
            stems,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn get(&self, label: StemLabel) -> Option<&Path> {
        self.stems.get(&label).map(PathBuf::as_path)
    }

    /// Stems in canonical label order.
    pub fn iter(&self) -> impl Iterator<Item = (StemLabel, &Path)> {
        self.stems.iter().map(|(l, p)| (*l, p.as_path()))
    }

    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    /// Source file name without extension, used to prefix outputs.
    pub fn source_stem(&self) -> &str {
        source_stem_name(&self.source)
    }
}

pub fn source_stem_name(path: &Path) -> &str {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("output")
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Wav,
    Mp3,
    Flac,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Wav, OutputFormat::Mp3, OutputFormat::Flac];

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Wav => "wav",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Flac => "flac",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = StemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wav" => Ok(OutputFormat::Wav),
            "mp3" => Ok(OutputFormat::Mp3),
            "flac" => Ok(OutputFormat::Flac),
            other => Err(StemError::invalid_input(format!(
                "unsupported output format `{other}` (expected wav, mp3 or flac)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Gpu,
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DevicePreference::Auto => "auto",
            DevicePreference::Cpu => "cpu",
            DevicePreference::Gpu => "gpu",
        })
    }
}

impl FromStr for DevicePreference {
    type Err = StemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "gpu" | "cuda" => Ok(DevicePreference::Gpu),
            other => Err(StemError::invalid_input(format!(
                "unknown device `{other}` (expected cpu, gpu or auto)"
            ))),
        }
    }
}

/// Concrete compute target a model instance is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Gpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Device::Cpu => "cpu",
            Device::Gpu => "gpu",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeparationRequest {
    source_path: PathBuf,
    model_name: String,
    device_preference: DevicePreference,
    output_format: OutputFormat,
}

impl SeparationRequest {
    pub fn new(
        source_path: impl Into<PathBuf>,
        model_name: impl Into<String>,
        device_preference: DevicePreference,
        output_format: OutputFormat,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            model_name: model_name.into(),
            device_preference,
            output_format,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn device_preference(&self) -> DevicePreference {
        self.device_preference
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelArtifact {
    pub file: String,
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelManifest {
    pub name: String,
    pub version: String,
    pub backend: String,
    pub sample_rate: u32,
    pub window: usize,
    pub hop: usize,
    pub stems: Vec<String>,
    pub input_layout: String,
    pub output_layout: String,
    pub artifacts: Vec<ModelArtifact>,
}

impl ModelManifest {
    /// The ONNX graph is the first `.onnx` artifact, or the first artifact at all.
    pub fn resolve_primary_artifact(&self) -> std::result::Result<&ModelArtifact, String> {
        self.artifacts
            .iter()
            .find(|a| a.file.ends_with(".onnx"))
            .or_else(|| self.artifacts.first())
            .ok_or_else(|| format!("manifest for `{}` lists no artifacts", self.name))
    }
}
