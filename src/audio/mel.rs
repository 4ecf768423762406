//! Log-mel front-end for the audio encoder.
//!
//! Centered STFT (reflect padding of `n_fft / 2` on both sides), power
//! spectrum, Slaney-normalized triangular mel filterbank and decibel
//! compression `10 * log10(max(x, 1e-10))`. Defaults follow the usual
//! 16 kHz audio-tagging front-end: 1024-point FFT, hop 320, 64 mel bands
//! between 50 Hz and 8 kHz.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

/// Parameters of the log-mel transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MelConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub f_min: f64,
    pub f_max: f64,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            n_fft: 1024,
            hop_length: 320,
            n_mels: 64,
            f_min: 50.0,
            f_max: 8000.0,
        }
    }
}

impl MelConfig {
    /// Number of frames produced for `num_samples` input samples.
    pub fn num_frames(&self, num_samples: usize) -> usize {
        num_samples / self.hop_length + 1
    }
}

/// Log-mel spectrogram processor.
///
/// The window, FFT plan and filterbank are built once; cloning shares them.
#[derive(Clone)]
pub struct LogMel {
    config: MelConfig,
    window: Arc<Vec<f64>>,
    filterbank: Arc<Vec<Vec<f64>>>,
    fft: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for LogMel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogMel").field("config", &self.config).finish()
    }
}

impl LogMel {
    pub fn new(config: MelConfig) -> Self {
        let window = hann_window(config.n_fft);
        let filterbank = mel_filterbank(
            config.n_fft,
            config.n_mels,
            config.sample_rate,
            config.f_min,
            config.f_max,
        );
        let fft = FftPlanner::new().plan_fft_forward(config.n_fft);
        Self {
            config,
            window: Arc::new(window),
            filterbank: Arc::new(filterbank),
            fft,
        }
    }

    pub fn config(&self) -> &MelConfig {
        &self.config
    }

    /// Convert mono samples to a row-major `[n_mels, num_frames]` matrix.
    pub fn process(&self, samples: &[f32]) -> Vec<f32> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let half = n_fft / 2;
        let num_bins = half + 1;
        let num_frames = self.config.num_frames(samples.len());

        let signal: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
        let padded = reflect_pad(&signal, half);

        let mut out = vec![0f32; self.config.n_mels * num_frames];
        let mut buffer = vec![Complex::new(0.0, 0.0); n_fft];
        let mut power = vec![0f64; num_bins];

        for frame in 0..num_frames {
            let start = frame * hop;
            for (i, slot) in buffer.iter_mut().enumerate() {
                let sample = padded.get(start + i).copied().unwrap_or(0.0);
                *slot = Complex::new(sample * self.window[i], 0.0);
            }
            self.fft.process(&mut buffer);
            for (bin, p) in power.iter_mut().enumerate() {
                *p = buffer[bin].norm_sqr();
            }

            for (mel, filter) in self.filterbank.iter().enumerate() {
                let energy: f64 = filter
                    .iter()
                    .zip(power.iter())
                    .filter(|(w, _)| **w > 0.0)
                    .map(|(w, p)| w * p)
                    .sum();
                out[mel * num_frames + frame] = (10.0 * energy.max(1e-10).log10()) as f32;
            }
        }

        out
    }
}

/// Periodic Hann window.
fn hann_window(length: usize) -> Vec<f64> {
    (0..length)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / length as f64;
            0.5 * (1.0 - phase.cos())
        })
        .collect()
}

/// Reflect-pad by `pad` samples on each side. Short signals fall back to
/// edge replication.
fn reflect_pad(signal: &[f64], pad: usize) -> Vec<f64> {
    let len = signal.len();
    if len == 0 {
        return vec![0.0; 2 * pad];
    }
    let mut padded = Vec::with_capacity(len + 2 * pad);
    for i in (1..=pad).rev() {
        padded.push(signal[i.min(len - 1)]);
    }
    padded.extend_from_slice(signal);
    for i in 0..pad {
        padded.push(signal[len.saturating_sub(2 + i)]);
    }
    padded
}

/// Slaney-normalized triangular filters, `n_mels` rows of `n_fft / 2 + 1`.
fn mel_filterbank(
    n_fft: usize,
    n_mels: usize,
    sample_rate: u32,
    f_min: f64,
    f_max: f64,
) -> Vec<Vec<f64>> {
    let num_bins = n_fft / 2 + 1;
    let sr = sample_rate as f64;
    let mel_min = hz_to_mel(f_min);
    let mel_max = hz_to_mel(f_max);

    let hz_points: Vec<f64> = (0..=(n_mels + 1))
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
        .collect();
    let bin_freqs: Vec<f64> = (0..num_bins).map(|i| sr * i as f64 / n_fft as f64).collect();

    (0..n_mels)
        .map(|i| {
            let (left, center, right) = (hz_points[i], hz_points[i + 1], hz_points[i + 2]);
            let norm = 2.0 / (right - left);
            bin_freqs
                .iter()
                .map(|&f| {
                    if f < left || f > right {
                        0.0
                    } else if f <= center {
                        norm * (f - left) / (center - left)
                    } else {
                        norm * (right - f) / (right - center)
                    }
                })
                .collect()
        })
        .collect()
}

fn hz_to_mel(hz: f64) -> f64 {
    if hz < 1000.0 {
        3.0 * hz / 200.0
    } else {
        15.0 + 27.0 * (hz / 1000.0).ln() / (6.4_f64).ln()
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel < 15.0 {
        200.0 * mel / 3.0
    } else {
        1000.0 * ((mel - 15.0) * (6.4_f64).ln() / 27.0).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_scale_roundtrip() {
        for &freq in &[50.0, 440.0, 1000.0, 4000.0, 8000.0] {
            let back = mel_to_hz(hz_to_mel(freq));
            assert!((freq - back).abs() < 0.01, "{freq} Hz came back as {back}");
        }
    }

    #[test]
    fn filterbank_covers_every_band() {
        let fb = mel_filterbank(1024, 64, 16000, 50.0, 8000.0);
        assert_eq!(fb.len(), 64);
        assert_eq!(fb[0].len(), 513);
        for (i, filter) in fb.iter().enumerate() {
            assert!(filter.iter().all(|&w| w >= 0.0));
            assert!(filter.iter().sum::<f64>() > 0.0, "band {i} is empty");
        }
    }

    #[test]
    fn reflect_pad_mirrors_edges() {
        let padded = reflect_pad(&[1.0, 2.0, 3.0, 4.0, 5.0], 2);
        assert_eq!(padded, vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 5.0, 4.0, 3.0]);
    }

    #[test]
    fn output_shape_follows_hop() {
        let mel = LogMel::new(MelConfig::default());
        let out = mel.process(&vec![0.0f32; 16000]);
        assert_eq!(out.len(), 64 * 51);
    }

    #[test]
    fn tone_has_more_energy_than_silence() {
        let mel = LogMel::new(MelConfig::default());
        let tone: Vec<f32> = (0..3200)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin())
            .collect();
        let loud: f32 = mel.process(&tone).iter().sum();
        let quiet: f32 = mel.process(&vec![0.0; 3200]).iter().sum();
        assert!(loud > quiet);
    }
}
