use std::{fs, fs::File, path::Path};

use anyhow::{anyhow, Context};
use hound::WavWriter;
use rubato::{FftFixedInOut, Resampler};
use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, codecs::CODEC_TYPE_NULL, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};

use crate::{
    error::{Result, StemError},
    types::{AudioData, OutputFormat},
};

const RESAMPLE_CHUNK: usize = 1024;
const MP3_BITRATE: mp3lame_encoder::Bitrate = mp3lame_encoder::Bitrate::Kbps320;

/// Decodes any container symphonia can probe into interleaved f32.
///
/// Unreadable, unrecognised or silent-empty files are `InvalidInput`.
pub fn read_audio<P: AsRef<Path>>(path: P) -> Result<AudioData> {
    let path: &Path = path.as_ref();

    let file: File = File::open(path).map_err(|e| {
        StemError::invalid_input(format!("Failed to open audio file {}: {e}", path.display()))
    })?;

    let mss: MediaSourceStream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint: Hint = Hint::new();

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| {
            StemError::invalid_input(format!("Unsupported or corrupt audio {}: {e}", path.display()))
        })?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| StemError::invalid_input(format!("No audio track in {}", path.display())))?;
    let track_id = track.id;

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| StemError::invalid_input(format!("No decoder for {}: {e}", path.display())))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate: u32 = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels: u16 = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);
    let mut bad_packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(StemError::invalid_input(format!(
                    "Failed reading {}: {e}",
                    path.display()
                )))
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                bad_packets += 1;
                tracing::warn!(path = %path.display(), error = e, "skipping undecodable packet");
                continue;
            }
            Err(e) => {
                return Err(StemError::invalid_input(format!(
                    "Failed decoding {}: {e}",
                    path.display()
                )))
            }
        };
        sample_rate = decoded.spec().rate;
        channels = decoded.spec().channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);

        samples.extend_from_slice(buffer.samples());
    }

    if samples.is_empty() || sample_rate == 0 || channels == 0 {
        return Err(StemError::invalid_input(format!(
            "No audio samples decoded from {}",
            path.display()
        )));
    }

    tracing::debug!(
        path = %path.display(),
        sample_rate,
        channels,
        samples = samples.len(),
        bad_packets,
        "read audio"
    );

    Ok(AudioData {
        samples,
        sample_rate,
        channels,
    })
}

/// Encodes `audio` to `path` in `format`.
pub fn write_audio<P: AsRef<Path>>(path: P, audio: &AudioData, format: OutputFormat) -> Result<()> {
    let path = path.as_ref();
    if audio.channels == 0 || audio.sample_rate == 0 {
        return Err(anyhow!("cannot encode audio without a channel layout").into());
    }
    match format {
        OutputFormat::Wav => write_wav(path, audio),
        OutputFormat::Flac => write_flac(path, audio),
        OutputFormat::Mp3 => write_mp3(path, audio),
    }
    .with_context(|| format!("Failed to write {} as {format}", path.display()))?;
    Ok(())
}

fn to_i16(sample: f32) -> i16 {
    (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

fn write_wav(path: &Path, audio: &AudioData) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for sample in &audio.samples {
        writer.write_sample(to_i16(*sample))?;
    }

    writer.finalize()?;
    Ok(())
}

fn write_flac(path: &Path, audio: &AudioData) -> anyhow::Result<()> {
    use flacenc::component::BitRepr;
    use flacenc::error::Verify;

    let pcm: Vec<i32> = audio.samples.iter().map(|s| to_i16(*s) as i32).collect();
    let config = flacenc::config::Encoder::default()
        .into_verified()
        .map_err(|(_, e)| anyhow!("flac encoder config: {e:?}"))?;
    let source = flacenc::source::MemSource::from_samples(
        &pcm,
        audio.channels as usize,
        16,
        audio.sample_rate as usize,
    );
    let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
        .map_err(|e| anyhow!("flac encode: {e:?}"))?;

    let mut sink = flacenc::bitsink::ByteSink::new();
    stream
        .write(&mut sink)
        .map_err(|_| anyhow!("flac bitstream serialisation failed"))?;
    fs::write(path, sink.as_slice())?;
    Ok(())
}

fn write_mp3(path: &Path, audio: &AudioData) -> anyhow::Result<()> {
    use mp3lame_encoder::{Builder, FlushNoGap, InterleavedPcm, MonoPcm, Quality};

    if audio.channels > 2 {
        return Err(anyhow!("mp3 output supports at most two channels"));
    }

    let mut builder = Builder::new().ok_or_else(|| anyhow!("failed to create LAME encoder"))?;
    builder
        .set_num_channels(audio.channels as u8)
        .map_err(|e| anyhow!("lame channels: {e:?}"))?;
    builder
        .set_sample_rate(audio.sample_rate)
        .map_err(|e| anyhow!("lame sample rate: {e:?}"))?;
    builder
        .set_brate(MP3_BITRATE)
        .map_err(|e| anyhow!("lame bitrate: {e:?}"))?;
    builder
        .set_quality(Quality::Best)
        .map_err(|e| anyhow!("lame quality: {e:?}"))?;
    let mut encoder = builder.build().map_err(|e| anyhow!("lame init: {e:?}"))?;

    let pcm: Vec<i16> = audio.samples.iter().map(|s| to_i16(*s)).collect();
    let mut out = Vec::new();
    out.reserve(mp3lame_encoder::max_required_buffer_size(pcm.len()));
    if audio.channels == 2 {
        encoder
            .encode_to_vec(InterleavedPcm(&pcm), &mut out)
            .map_err(|e| anyhow!("lame encode: {e:?}"))?;
    } else {
        encoder
            .encode_to_vec(MonoPcm(&pcm), &mut out)
            .map_err(|e| anyhow!("lame encode: {e:?}"))?;
    }
    out.reserve(7200);
    encoder
        .flush_to_vec::<FlushNoGap>(&mut out)
        .map_err(|e| anyhow!("lame flush: {e:?}"))?;

    fs::write(path, &out)?;
    Ok(())
}

/// Converts to `target_rate`, keeping the channel count. No-op when rates match.
pub fn resample(audio: &AudioData, target_rate: u32) -> Result<AudioData> {
    if audio.sample_rate == target_rate {
        return Ok(audio.clone());
    }
    let channels = audio.channels as usize;
    if channels == 0 {
        return Err(StemError::invalid_input("cannot resample audio without channels"));
    }

    let mut resampler = FftFixedInOut::<f32>::new(
        audio.sample_rate as usize,
        target_rate as usize,
        RESAMPLE_CHUNK,
        channels,
    )
    .map_err(|e| anyhow!("resampler setup {}→{}: {e}", audio.sample_rate, target_rate))?;

    let frames = audio.frames();
    let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); channels];
    for frame in audio.samples.chunks_exact(channels) {
        for (ch, s) in frame.iter().enumerate() {
            planar[ch].push(*s);
        }
    }

    let expected_out =
        (frames as u64 * target_rate as u64 / audio.sample_rate as u64) as usize;
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected_out + RESAMPLE_CHUNK); channels];

    let mut pos = 0usize;
    // Trailing zero chunk flushes the resampler delay.
    while pos < frames + RESAMPLE_CHUNK {
        let need = resampler.input_frames_next();
        let chunk: Vec<Vec<f32>> = planar
            .iter()
            .map(|ch| {
                let mut c: Vec<f32> = ch.iter().skip(pos).take(need).copied().collect();
                c.resize(need, 0.0);
                c
            })
            .collect();
        let processed = resampler
            .process(&chunk, None)
            .map_err(|e| anyhow!("resample: {e}"))?;
        for (dst, src) in out.iter_mut().zip(processed) {
            dst.extend_from_slice(&src);
        }
        pos += need;
    }

    // Drop the resampler's leading delay, then trim to the expected length.
    let delay = resampler.output_delay();
    let mut samples = Vec::with_capacity(expected_out * channels);
    for i in 0..expected_out {
        for ch in &out {
            samples.push(ch.get(delay + i).copied().unwrap_or(0.0));
        }
    }

    Ok(AudioData {
        samples,
        sample_rate: target_rate,
        channels: audio.channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i16_conversion_clamps() {
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), i16::MIN);
        assert_eq!(to_i16(0.0), 0);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let a = AudioData {
            samples: vec![0.1, 0.2, 0.3, 0.4],
            sample_rate: 44_100,
            channels: 2,
        };
        let b = resample(&a, 44_100).unwrap();
        assert_eq!(a.samples, b.samples);
    }

    #[test]
    fn resample_scales_length() {
        let frames = 48_000usize;
        let a = AudioData {
            samples: (0..frames * 2).map(|i| ((i / 2) as f32 * 0.01).sin() * 0.3).collect(),
            sample_rate: 48_000,
            channels: 2,
        };
        let b = resample(&a, 44_100).unwrap();
        assert_eq!(b.sample_rate, 44_100);
        assert_eq!(b.channels, 2);
        assert_eq!(b.frames(), 44_100);
    }
}
