use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    core::{
        audio::{read_audio, resample, write_audio},
        dsp::{interleave_stereo, to_planar_stereo},
    },
    error::{Result, StemError},
    io::progress::{emit_split_progress, SplitProgress},
    model::backend::StemModel,
    types::{source_stem_name, AudioData, SeparationRequest, StemLabel, StemSet},
};

/// `<source>_<label>.<ext>` inside `output_dir`.
pub fn stem_output_path(output_dir: &Path, request: &SeparationRequest, label: StemLabel) -> PathBuf {
    let base = source_stem_name(request.source_path());
    output_dir.join(format!(
        "{base}_{label}.{}",
        request.output_format().extension()
    ))
}

/// Runs one request through `model` and writes the four stems to `output_dir`.
///
/// Never changes device: an accelerator OOM comes back as
/// [`StemError::DeviceOom`] for the caller to act on. On failure no stem files
/// from this call are left behind.
pub fn execute(request: &SeparationRequest, model: &dyn StemModel, output_dir: &Path) -> Result<StemSet> {
    emit_split_progress(SplitProgress::Stage("read_audio"));
    let audio = read_audio(request.source_path())?;
    let input = normalize_for_model(&audio, model.sample_rate())?;

    emit_split_progress(SplitProgress::Stage("infer"));
    tracing::debug!(
        source = %request.source_path().display(),
        model = model.name(),
        device = %model.device(),
        frames = input.frames(),
        "running separation"
    );
    let stems = model.separate(&input)?;
    stems.validate()?;

    emit_split_progress(SplitProgress::Stage("write_stems"));
    fs::create_dir_all(output_dir)
        .map_err(|e| StemError::Workspace(format!("{}: {e}", output_dir.display())))?;

    let mut written: BTreeMap<StemLabel, PathBuf> = BTreeMap::new();
    let total = StemLabel::ALL.len();
    for (i, label) in StemLabel::ALL.into_iter().enumerate() {
        let path = stem_output_path(output_dir, request, label);
        if let Err(e) = write_audio(&path, &stems.as_audio(label), request.output_format()) {
            let _ = fs::remove_file(&path);
            discard(&written);
            return Err(e);
        }
        written.insert(label, path);
        emit_split_progress(SplitProgress::Writing {
            stem: label.as_str(),
            done: i + 1,
            total,
            percent: (i + 1) as f32 / total as f32 * 100.0,
        });
    }

    emit_split_progress(SplitProgress::Stage("finalize"));
    let set = match StemSet::new(request.source_path(), written.clone()) {
        Ok(set) => set,
        Err(e) => {
            discard(&written);
            return Err(e);
        }
    };
    emit_split_progress(SplitProgress::Finished);
    Ok(set)
}

/// Stereo interleaved at `target_rate`.
fn normalize_for_model(audio: &AudioData, target_rate: u32) -> Result<AudioData> {
    let stereo = to_planar_stereo(&audio.samples, audio.channels);
    if stereo.is_empty() {
        return Err(StemError::invalid_input("Empty audio"));
    }
    let stereo = AudioData {
        samples: interleave_stereo(&stereo),
        sample_rate: audio.sample_rate,
        channels: 2,
    };
    resample(&stereo, target_rate)
}

fn discard(written: &BTreeMap<StemLabel, PathBuf>) {
    for path in written.values() {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove partial stem");
        }
    }
}
