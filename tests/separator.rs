mod common;

use std::{fs, fs::File, path::Path, sync::Arc};

use common::{mock_separator, write_sine_wav, MockLoader, MODEL_RATE};
use stem_splitter::{
    core::executor::execute,
    error::Result,
    package, read_audio,
    types::{AudioData, Device, StemWaveforms},
    write_audio, DevicePreference, OutputFormat, SeparationRequest, StemError, StemLabel,
    StemModel,
};
use tempfile::tempdir;

fn request(path: &Path, format: OutputFormat) -> SeparationRequest {
    SeparationRequest::new(path, "htdemucs", DevicePreference::Auto, format)
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn mp3_upload_produces_named_wav_stems_and_archive() {
    let tmp = tempdir().unwrap();
    let song = tmp.path().join("song.mp3");
    let source = AudioData {
        samples: (0..MODEL_RATE as usize * 2)
            .map(|i| ((i / 2) as f32 * 0.03).sin() * 0.3)
            .collect(),
        sample_rate: MODEL_RATE,
        channels: 2,
    };
    write_audio(&song, &source, OutputFormat::Mp3).unwrap();

    let separator = mock_separator(Arc::new(MockLoader::default()), false);
    let out = tmp.path().join("out");
    let stems = separator
        .separate(&request(&song, OutputFormat::Wav), &out)
        .unwrap();

    assert_eq!(stems.len(), 4);
    for label in StemLabel::ALL {
        let path = stems.get(label).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("song_{label}.wav")
        );
        assert!(fs::metadata(path).unwrap().len() > 0);
    }

    let archive = package(&stems, tmp.path()).unwrap();
    assert_eq!(archive.file_name().unwrap(), "song_stems.zip");
    let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
    let members: Vec<String> = (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect();
    assert_eq!(
        members,
        vec![
            "song_vocals.wav",
            "song_drums.wav",
            "song_bass.wav",
            "song_other.wav"
        ]
    );
}

#[test]
fn packaging_twice_keeps_member_order() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("track.wav");
    write_sine_wav(&input, MODEL_RATE, 2, 0.25);

    let separator = mock_separator(Arc::new(MockLoader::default()), false);
    let stems = separator
        .separate(&request(&input, OutputFormat::Wav), &tmp.path().join("out"))
        .unwrap();

    let names = |dir: &Path| {
        let archive = package(&stems, dir).unwrap();
        let mut zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect::<Vec<_>>()
    };
    assert_eq!(names(&tmp.path().join("a")), names(&tmp.path().join("b")));
}

#[test]
fn mono_input_at_other_rate_is_normalised_for_the_model() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("mono.wav");
    write_sine_wav(&input, 48_000, 1, 0.5);

    let separator = mock_separator(Arc::new(MockLoader::default()), false);
    let stems = separator
        .separate(&request(&input, OutputFormat::Flac), &tmp.path().join("out"))
        .unwrap();

    let vocals = read_audio(stems.get(StemLabel::Vocals).unwrap()).unwrap();
    assert_eq!(vocals.channels, 2);
    assert_eq!(vocals.sample_rate, MODEL_RATE);
    let expected = MODEL_RATE as i64 / 2;
    assert!((vocals.frames() as i64 - expected).abs() <= 16);
    assert!(stems
        .get(StemLabel::Other)
        .unwrap()
        .to_string_lossy()
        .ends_with("mono_other.flac"));
}

#[test]
fn validation_rejects_before_any_load() {
    let tmp = tempdir().unwrap();
    let loader = Arc::new(MockLoader::default());
    let separator = mock_separator(loader.clone(), false);
    let out = tmp.path().join("out");

    let missing = tmp.path().join("missing.wav");
    assert!(matches!(
        separator.separate(&request(&missing, OutputFormat::Wav), &out),
        Err(StemError::InvalidInput(_))
    ));

    let text = tmp.path().join("notes.txt");
    fs::write(&text, "not audio").unwrap();
    assert!(matches!(
        separator.separate(&request(&text, OutputFormat::Wav), &out),
        Err(StemError::InvalidInput(_))
    ));

    let input = tmp.path().join("ok.wav");
    write_sine_wav(&input, MODEL_RATE, 2, 0.1);
    let unknown = SeparationRequest::new(&input, "mdx_extra", DevicePreference::Auto, OutputFormat::Wav);
    assert!(matches!(
        separator.separate(&unknown, &out),
        Err(StemError::ModelNotFound(_))
    ));

    assert_eq!(loader.load_count(), 0);
}

#[test]
fn explicit_gpu_without_accelerator_is_rejected() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("a.wav");
    write_sine_wav(&input, MODEL_RATE, 2, 0.1);
    let loader = Arc::new(MockLoader::default());
    let separator = mock_separator(loader.clone(), false);

    let req = SeparationRequest::new(&input, "", DevicePreference::Gpu, OutputFormat::Wav);
    assert!(matches!(
        separator.separate(&req, &tmp.path().join("out")),
        Err(StemError::DeviceUnavailable(_))
    ));
    assert_eq!(loader.load_count(), 0);
}

#[test]
fn auto_retries_on_cpu_after_accelerator_oom() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("a.wav");
    write_sine_wav(&input, MODEL_RATE, 2, 0.1);
    let loader = Arc::new(MockLoader {
        oom_on_gpu: true,
        ..Default::default()
    });
    let separator = mock_separator(loader.clone(), true);

    let stems = separator
        .separate(&request(&input, OutputFormat::Wav), &tmp.path().join("out"))
        .unwrap();
    assert_eq!(stems.len(), 4);
    assert_eq!(loader.load_count(), 2);
    assert_eq!(separator.cache().loaded().len(), 2);
}

#[test]
fn explicit_gpu_oom_is_reported_not_downgraded() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("a.wav");
    write_sine_wav(&input, MODEL_RATE, 2, 0.1);
    let loader = Arc::new(MockLoader {
        oom_on_gpu: true,
        ..Default::default()
    });
    let separator = mock_separator(loader.clone(), true);
    let out = tmp.path().join("out");

    let req = SeparationRequest::new(&input, "htdemucs", DevicePreference::Gpu, OutputFormat::Wav);
    let err = separator.separate(&req, &out).unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, StemError::DeviceOom { device: Device::Gpu, .. }));
    assert_eq!(loader.load_count(), 1);
    assert!(!out.exists() || file_names(&out).is_empty());
}

struct LopsidedModel;

impl StemModel for LopsidedModel {
    fn name(&self) -> &str {
        "lopsided"
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn sample_rate(&self) -> u32 {
        MODEL_RATE
    }

    fn separate(&self, input: &AudioData) -> Result<StemWaveforms> {
        let n = input.samples.len();
        Ok(StemWaveforms {
            sample_rate: MODEL_RATE,
            channels: 2,
            vocals: vec![0.1; n],
            drums: vec![0.1; n],
            bass: vec![0.1; n / 2],
            other: vec![0.1; n],
        })
    }
}

#[test]
fn inconsistent_model_output_writes_nothing() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("a.wav");
    write_sine_wav(&input, MODEL_RATE, 2, 0.1);
    let out = tmp.path().join("out");

    let err = execute(&request(&input, OutputFormat::Wav), &LopsidedModel, &out).unwrap_err();

    assert!(matches!(err, StemError::Separation(_)));
    assert!(!out.exists() || file_names(&out).is_empty());
}
