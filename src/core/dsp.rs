use num_complex::Complex32;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

fn compute_hann(n_fft: usize) -> Vec<f32> {
    if n_fft <= 1 {
        return vec![1.0];
    }
    let denom = (n_fft - 1) as f32;
    (0..n_fft)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * (i as f32) / denom).cos())
        .collect()
}

/// Interleaved samples to `[L, R]` frames. Mono is duplicated, channels past
/// the second are dropped.
pub fn to_planar_stereo(interleaved: &[f32], channels: u16) -> Vec<[f32; 2]> {
    match channels {
        0 => Vec::new(),
        1 => interleaved.iter().map(|&x| [x, x]).collect(),
        n => interleaved
            .chunks_exact(n as usize)
            .map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

pub fn interleave_stereo(frames: &[[f32; 2]]) -> Vec<f32> {
    let mut out = Vec::with_capacity(frames.len() * 2);
    for f in frames {
        out.push(f[0]);
        out.push(f[1]);
    }
    out
}

/// Forward STFT plan for the spectrogram branch of hybrid Demucs graphs.
///
/// Built once per loaded model; planning a 4096-point FFT per window is not free.
pub struct StereoStft {
    n_fft: usize,
    hop: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl StereoStft {
    pub fn new(n_fft: usize, hop: usize) -> Self {
        assert!(n_fft >= 2 && hop > 0, "n_fft must be >= 2 and hop > 0");
        let mut planner = FftPlanner::new();
        Self {
            n_fft,
            hop,
            fft: planner.plan_fft_forward(n_fft),
            window: compute_hann(n_fft),
        }
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// `(F, Frames)` produced for a signal of `t` samples.
    pub fn dims(&self, t: usize) -> (usize, usize) {
        (self.n_fft / 2, 1 + t / self.hop)
    }

    /// Complex-as-channels spectrogram with centre padding.
    ///
    /// Layout is `[4, F, Frames]` flattened, channels `L.re, L.im, R.re, R.im`.
    /// Returns `(buffer, F, Frames)`.
    pub fn cac_centered(&self, left: &[f32], right: &[f32]) -> (Vec<f32>, usize, usize) {
        assert_eq!(left.len(), right.len());
        let n_fft = self.n_fft;
        let t = left.len();
        let pad = n_fft / 2;

        let padded_len = pad + t + pad;
        let mut l_sig = vec![0.0f32; padded_len];
        let mut r_sig = vec![0.0f32; padded_len];
        l_sig[pad..pad + t].copy_from_slice(left);
        r_sig[pad..pad + t].copy_from_slice(right);

        let (f_bins, frames) = self.dims(t);
        let plane = f_bins * frames;
        let mut out = vec![0.0f32; 4 * plane];

        let mut buf_l = vec![Complex32::zero(); n_fft];
        let mut buf_r = vec![Complex32::zero(); n_fft];

        for fr in 0..frames {
            let start = fr * self.hop;
            for i in 0..n_fft {
                let w = self.window[i];
                let li = l_sig.get(start + i).copied().unwrap_or(0.0);
                let ri = r_sig.get(start + i).copied().unwrap_or(0.0);
                buf_l[i] = Complex32::new(li * w, 0.0);
                buf_r[i] = Complex32::new(ri * w, 0.0);
            }

            self.fft.process(&mut buf_l);
            self.fft.process(&mut buf_r);

            for fi in 0..f_bins {
                let idx = fi * frames + fr;
                out[idx] = buf_l[fi].re;
                out[plane + idx] = buf_l[fi].im;
                out[2 * plane + idx] = buf_r[fi].re;
                out[3 * plane + idx] = buf_r[fi].im;
            }
        }

        (out, f_bins, frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_is_symmetric_and_zero_at_edges() {
        let w = compute_hann(8);
        assert!(w[0].abs() < 1e-6);
        assert!(w[7].abs() < 1e-6);
        for i in 0..4 {
            assert!((w[i] - w[7 - i]).abs() < 1e-6);
        }
    }

    #[test]
    fn surround_input_keeps_front_pair() {
        let six = [1.0, 2.0, 9.0, 9.0, 9.0, 9.0, 3.0, 4.0, 9.0, 9.0, 9.0, 9.0];
        assert_eq!(to_planar_stereo(&six, 6), vec![[1.0, 2.0], [3.0, 4.0]]);
    }
}
