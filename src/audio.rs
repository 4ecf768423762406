//! Audio I/O utilities.
//!
//! WAV decoding, resampling to the 16 kHz model rate, fixed-window framing
//! and the log-mel front-end used by the audio encoder.

mod frame;
pub mod mel;
mod resample;
mod wav;

pub use frame::{AudioFrameAdapter, DEFAULT_CLIP_SECONDS, DEFAULT_SAMPLE_RATE, fit_to_length};
pub use resample::resample;
pub use wav::{downmix_to_mono, read_wav, write_wav};
