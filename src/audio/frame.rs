//! Fixed-window waveform loading.
//!
//! Every dataset entry is turned into a mono waveform at the target rate
//! with exactly `sample_rate * clip_seconds` samples: longer inputs are
//! truncated, shorter ones are right-padded with zeros.

use std::path::Path;

use super::resample::resample;
use super::wav::{downmix_to_mono, read_wav};
use crate::Result;

/// Default target sample rate (Hz).
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Default clip length (seconds).
pub const DEFAULT_CLIP_SECONDS: f64 = 30.0;

/// Loads audio files into fixed-length mono frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFrameAdapter {
    sample_rate: u32,
    clip_seconds: f64,
}

impl Default for AudioFrameAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_CLIP_SECONDS)
    }
}

impl AudioFrameAdapter {
    pub fn new(sample_rate: u32, clip_seconds: f64) -> Self {
        Self {
            sample_rate,
            clip_seconds,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples in every frame produced by this adapter.
    pub fn frame_len(&self) -> usize {
        (self.sample_rate as f64 * self.clip_seconds).round() as usize
    }

    /// Load, downmix, resample and fit a file to the fixed window.
    ///
    /// A missing or corrupt file is an error; callers must not skip it.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Vec<f32>> {
        let (samples, native_rate, channels) = read_wav(path)?;
        let mono = downmix_to_mono(&samples, channels);
        self.adapt(&mono, native_rate)
    }

    /// Resample an already-decoded mono waveform and fit it to the window.
    pub fn adapt(&self, mono: &[f32], native_rate: u32) -> Result<Vec<f32>> {
        let resampled = resample(mono, native_rate, self.sample_rate)?;
        Ok(fit_to_length(resampled, self.frame_len()))
    }
}

/// Truncate or zero-pad to exactly `len` samples.
pub fn fit_to_length(mut samples: Vec<f32>, len: usize) -> Vec<f32> {
    samples.resize(len, 0.0);
    samples
}
