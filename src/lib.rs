//! Audio captioning in pure Rust.
//!
//! A candle-based training and evaluation pipeline for prefix captioning
//! models: an audio clip is embedded into a fixed-length prefix that a
//! causal language model continues into a caption.
//!
//! ## Pipeline
//!
//! ```text
//! wav → AudioFrameAdapter (16 kHz, 30 s) ──────────────┐
//!                                                       ├→ TrainLoader → TrainingLoop
//! captions.csv → CaptionNormalizer → CaptionTokenizer ──┘         │
//!                                                                 ↓
//!                                     Evaluator (greedy / beam) → metrics provider → report
//! ```
//!
//! ## Modules
//!
//! - [`audio`]: WAV I/O, resampling, fixed windows, log-mel
//! - [`text`]: caption normalization and the two tokenizer backends
//! - [`dataset`]: caption table join, per-file records, padding and batching
//! - [`model`]: the [`model::CaptionModel`] contract and a reference captioner
//! - [`train`]: optimizer groups, LR schedule, freezing, checkpoints, epoch loop
//! - [`eval`]: decoding, metrics provider contract, reports
//! - [`config`]: JSON experiment configuration
//! - [`pipeline`]: builds all of the above from one config

pub mod audio;
pub mod config;
pub mod dataset;
pub mod eval;
pub mod model;
pub mod pipeline;
pub mod text;
pub mod train;

mod error;

pub use error::{Error, Result};
