//! Experiment configuration.
//!
//! Defaults reproduce the reference Clotho experiment: 60 epochs, AdamW at
//! 5e-5, 15 temporal + 11 global prefix vectors, beam search decoding.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::mel::MelConfig;
use crate::text::TokenizerConfig;
use crate::{Error, Result};

/// Which corpus is being trained on. Selects the encoder freeze epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    AudioCaps,
    Clotho,
}

impl DatasetKind {
    /// Zero-based epoch after which the audio encoder is frozen.
    pub fn encoder_freeze_epoch(self) -> usize {
        match self {
            DatasetKind::AudioCaps => 15,
            DatasetKind::Clotho => 29,
        }
    }
}

/// Top-level configuration for one training/evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Names checkpoint directories and evaluation reports.
    pub run_name: String,
    pub epochs: usize,
    pub seed: u64,
    pub dataset: DatasetConfig,
    pub tokenizer: TokenizerConfig,
    pub optimizer: OptimizerConfig,
    pub decode: DecodeConfig,
    pub model: CaptionerConfig,
    pub evaluation: EvalScheduleConfig,
    pub metrics: MetricsConfig,
    pub checkpoint_root: PathBuf,
    pub eval_dir: PathBuf,
    /// Variables restored before the first epoch, e.g. an AudioCaps run
    /// reused to warm-start Clotho training.
    pub init_checkpoint: Option<PathBuf>,
    /// Freeze the audio encoder from the first step.
    pub freeze_audio_encoder: bool,
    /// Never update the decoder. The prefix mapper still trains.
    pub freeze_decoder: bool,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            run_name: "prefix_captioner_clotho".to_string(),
            epochs: 60,
            seed: 2766,
            dataset: DatasetConfig::default(),
            tokenizer: TokenizerConfig::default(),
            optimizer: OptimizerConfig::default(),
            decode: DecodeConfig::default(),
            model: CaptionerConfig::default(),
            evaluation: EvalScheduleConfig::default(),
            metrics: MetricsConfig::default(),
            checkpoint_root: PathBuf::from("./Train_record"),
            eval_dir: PathBuf::from("./eval_result"),
            init_checkpoint: None,
            freeze_audio_encoder: false,
            freeze_decoder: false,
        }
    }
}

impl ExperimentConfig {
    /// Load a JSON config. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        tracing::info!("Loaded experiment config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.run_name.is_empty() {
            return Err(Error::Config("run_name must not be empty".into()));
        }
        if self.epochs == 0 {
            return Err(Error::Config("epochs must be at least 1".into()));
        }
        if self.dataset.train_batch_size == 0 {
            return Err(Error::Config("train_batch_size must be at least 1".into()));
        }
        if self.dataset.sample_rate == 0 || self.dataset.clip_seconds <= 0.0 {
            return Err(Error::Config(format!(
                "invalid audio window: {} Hz x {} s",
                self.dataset.sample_rate, self.dataset.clip_seconds
            )));
        }
        if self.model.mel.sample_rate != self.dataset.sample_rate {
            return Err(Error::Config(format!(
                "mel front-end expects {} Hz but the dataset is resampled to {} Hz",
                self.model.mel.sample_rate, self.dataset.sample_rate
            )));
        }
        if !(self.optimizer.lr > 0.0) {
            return Err(Error::Config(format!("lr must be positive, got {}", self.optimizer.lr)));
        }
        if !(0.0..1.0).contains(&self.optimizer.warmup_fraction) {
            return Err(Error::Config(format!(
                "warmup_fraction must be in [0, 1), got {}",
                self.optimizer.warmup_fraction
            )));
        }
        if self.decode.beam_search && self.decode.beam_width == 0 {
            return Err(Error::Config("beam_width must be at least 1".into()));
        }
        if self.decode.max_length == 0 {
            return Err(Error::Config("decode max_length must be at least 1".into()));
        }
        if self.evaluation.every == 0 {
            return Err(Error::Config("evaluation.every must be at least 1".into()));
        }
        self.model.validate()
    }

    /// Zero-based epoch after which the audio encoder is frozen.
    pub fn encoder_freeze_epoch(&self) -> usize {
        self.dataset.kind.encoder_freeze_epoch()
    }
}

/// Dataset location and batching.
///
/// Expected layout under `data_dir`:
/// `clotho_audio_files/{split}/*.wav` and
/// `clotho_csv_files/clotho_captions_{split}.csv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub kind: DatasetKind,
    pub data_dir: PathBuf,
    pub train_split: String,
    pub eval_split: String,
    pub train_batch_size: usize,
    pub shuffle: bool,
    pub drop_last: bool,
    /// Loader threads. `None` uses the global rayon pool.
    pub workers: Option<usize>,
    pub sample_rate: u32,
    pub clip_seconds: f64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            kind: DatasetKind::Clotho,
            data_dir: PathBuf::from("./Clotho"),
            train_split: "development".to_string(),
            eval_split: "evaluation".to_string(),
            train_batch_size: 55,
            shuffle: true,
            drop_last: true,
            workers: None,
            sample_rate: 16_000,
            clip_seconds: 30.0,
        }
    }
}

impl DatasetConfig {
    pub fn audio_dir(&self, split: &str) -> PathBuf {
        self.data_dir.join("clotho_audio_files").join(split)
    }

    pub fn captions_csv(&self, split: &str) -> PathBuf {
        self.data_dir
            .join("clotho_csv_files")
            .join(format!("clotho_captions_{split}.csv"))
    }
}

/// AdamW and learning-rate schedule settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub lr: f64,
    pub weight_decay: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    /// Fraction of total optimizer steps spent in linear warmup.
    pub warmup_fraction: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            lr: 5e-5,
            weight_decay: 0.01,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            warmup_fraction: 1.0 / 6.0,
        }
    }
}

/// Caption decoding at evaluation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Beam search when true, greedy otherwise.
    pub beam_search: bool,
    pub beam_width: usize,
    /// Maximum number of generated tokens.
    pub max_length: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            beam_search: true,
            beam_width: 5,
            max_length: 67,
        }
    }
}

/// When evaluation runs during training.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalScheduleConfig {
    /// First zero-based epoch eligible for evaluation.
    pub first_epoch: usize,
    /// Evaluate at epochs where `(epoch + 1) % every == 0`.
    pub every: usize,
}

impl Default for EvalScheduleConfig {
    fn default() -> Self {
        Self {
            first_epoch: 9,
            every: 5,
        }
    }
}

impl EvalScheduleConfig {
    pub fn is_due(&self, epoch: usize) -> bool {
        epoch >= self.first_epoch && (epoch + 1) % self.every == 0
    }
}

/// External metrics program. Receives predictions and references as JSON
/// on stdin and writes `{metric: {"score": f}}` to stdout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Program followed by its arguments.
    pub command: Vec<String>,
}

/// Reference prefix captioner hyper-parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionerConfig {
    /// Filled from the tokenizer at build time when zero.
    pub vocab_size: usize,
    pub audio_prefix_length: usize,
    pub semantic_prefix_length: usize,
    pub hidden_size: usize,
    pub num_heads: usize,
    pub num_decoder_layers: usize,
    pub num_mapping_layers: usize,
    pub encoder_channels: usize,
    pub max_positions: usize,
    pub dropout: f32,
    pub layer_norm_eps: f64,
    pub mel: MelConfig,
}

impl Default for CaptionerConfig {
    fn default() -> Self {
        Self {
            vocab_size: 0,
            audio_prefix_length: 15,
            semantic_prefix_length: 11,
            hidden_size: 768,
            num_heads: 12,
            num_decoder_layers: 12,
            num_mapping_layers: 4,
            encoder_channels: 256,
            max_positions: 1024,
            dropout: 0.1,
            layer_norm_eps: 1e-5,
            mel: MelConfig::default(),
        }
    }
}

impl CaptionerConfig {
    /// A few-thousand-parameter model for CPU tests.
    pub fn tiny(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            audio_prefix_length: 3,
            semantic_prefix_length: 2,
            hidden_size: 16,
            num_heads: 2,
            num_decoder_layers: 1,
            num_mapping_layers: 1,
            encoder_channels: 8,
            max_positions: 64,
            dropout: 0.0,
            layer_norm_eps: 1e-5,
            mel: MelConfig {
                n_fft: 256,
                hop_length: 160,
                n_mels: 16,
                ..MelConfig::default()
            },
        }
    }

    pub fn prefix_length(&self) -> usize {
        self.audio_prefix_length + self.semantic_prefix_length
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_heads == 0 || self.hidden_size % self.num_heads != 0 {
            return Err(Error::Config(format!(
                "hidden_size {} is not divisible by num_heads {}",
                self.hidden_size, self.num_heads
            )));
        }
        if self.audio_prefix_length == 0 {
            return Err(Error::Config("audio_prefix_length must be at least 1".into()));
        }
        Ok(())
    }
}
