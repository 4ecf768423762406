//! Per-audio dataset records for the training and evaluation splits.
//!
//! Each audio file becomes exactly one record holding its path and all five
//! captions, so audio, tokens and references can never drift apart.

use std::path::{Path, PathBuf};

use super::CAPTIONS_PER_AUDIO;
use super::captions::CaptionTable;
use crate::text::{CaptionNormalizer, CaptionTokenizer};
use crate::{Error, Result};

/// Id the loss treats as "ignore". Also a real token in most vocabularies.
pub const LOSS_IGNORE_ID: u32 = 0;

/// One training audio file with its five tokenized captions.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSample {
    pub file_name: String,
    pub audio_path: PathBuf,
    /// Each sequence ends with the tokenizer's end-of-sequence id.
    pub tokens: [Vec<u32>; CAPTIONS_PER_AUDIO],
}

/// One evaluation audio file with its five normalized reference captions.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalSample {
    pub file_name: String,
    pub audio_path: PathBuf,
    pub captions: [String; CAPTIONS_PER_AUDIO],
}

/// Training split: ordered records plus the corpus-wide padded length.
#[derive(Debug, Clone)]
pub struct TrainIndex {
    samples: Vec<TrainSample>,
    max_seq_len: usize,
}

impl TrainIndex {
    /// Normalize and tokenize the captions of every audio file in `audio_dir`.
    pub fn build(
        audio_dir: impl AsRef<Path>,
        table: &CaptionTable,
        tokenizer: &CaptionTokenizer,
    ) -> Result<Self> {
        let normalizer = tokenizer.normalizer();
        let mut samples = Vec::new();
        for (file_name, audio_path) in list_audio_files(audio_dir)? {
            let captions = normalized_captions(table, &normalizer, &file_name)?;
            let mut tokens: [Vec<u32>; CAPTIONS_PER_AUDIO] = Default::default();
            for (slot, caption) in tokens.iter_mut().zip(captions.iter()) {
                *slot = tokenizer.encode(caption).map_err(|e| match e {
                    Error::Dataset(msg) => Error::Dataset(format!("{file_name}: {msg}")),
                    other => other,
                })?;
            }
            samples.push(TrainSample {
                file_name,
                audio_path,
                tokens,
            });
        }

        let index = Self::from_samples(samples);
        index.warn_on_ignore_id();
        tracing::info!(
            samples = index.len(),
            max_seq_len = index.max_seq_len,
            "built training index"
        );
        Ok(index)
    }

    /// Wrap already-tokenized records and derive `max_seq_len` from them.
    pub fn from_samples(samples: Vec<TrainSample>) -> Self {
        let lengths: Vec<usize> = samples
            .iter()
            .flat_map(|s| s.tokens.iter().map(Vec::len))
            .collect();
        let max_seq_len = max_seq_len(&lengths);
        Self {
            samples,
            max_seq_len,
        }
    }

    pub fn samples(&self) -> &[TrainSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    fn warn_on_ignore_id(&self) {
        let hits = self
            .samples
            .iter()
            .flat_map(|s| s.tokens.iter())
            .filter(|t| t.contains(&LOSS_IGNORE_ID))
            .count();
        if hits > 0 {
            tracing::warn!(
                captions = hits,
                "token id {LOSS_IGNORE_ID} is a real vocabulary entry but is also the \
                 loss-ignore id; those tokens will not be trained"
            );
        }
    }
}

/// Evaluation split: ordered records with raw-text references.
#[derive(Debug, Clone)]
pub struct EvalIndex {
    samples: Vec<EvalSample>,
}

impl EvalIndex {
    pub fn build(
        audio_dir: impl AsRef<Path>,
        table: &CaptionTable,
        normalizer: &CaptionNormalizer,
    ) -> Result<Self> {
        let mut samples = Vec::new();
        for (file_name, audio_path) in list_audio_files(audio_dir)? {
            let captions = normalized_captions(table, normalizer, &file_name)?;
            samples.push(EvalSample {
                file_name,
                audio_path,
                captions,
            });
        }
        tracing::info!(samples = samples.len(), "built evaluation index");
        Ok(Self { samples })
    }

    pub fn from_samples(samples: Vec<EvalSample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[EvalSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn normalized_captions(
    table: &CaptionTable,
    normalizer: &CaptionNormalizer,
    file_name: &str,
) -> Result<[String; CAPTIONS_PER_AUDIO]> {
    let raw = table.captions(file_name)?;
    let mut out: [String; CAPTIONS_PER_AUDIO] = Default::default();
    for (i, (slot, caption)) in out.iter_mut().zip(raw.iter()).enumerate() {
        *slot = normalizer.normalize(caption);
        if slot.is_empty() {
            return Err(Error::Dataset(format!(
                "caption_{} of {file_name:?} is empty after normalization: {caption:?}",
                i + 1
            )));
        }
    }
    Ok(out)
}

/// `.wav` files of a split directory, sorted by name.
pub fn list_audio_files(dir: impl AsRef<Path>) -> Result<Vec<(String, PathBuf)>> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::Dataset(format!("cannot list audio directory {}: {e}", dir.display()))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if !path.is_file() || !is_wav {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            files.push((name.to_string(), path.clone()));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// `min(floor(mean + 10 * std), max)` over caption lengths, with the
/// sample standard deviation. Zero for an empty corpus.
pub fn max_seq_len(lengths: &[usize]) -> usize {
    let Some(&longest) = lengths.iter().max() else {
        return 0;
    };
    let n = lengths.len() as f64;
    let mean = lengths.iter().sum::<usize>() as f64 / n;
    let std = if lengths.len() < 2 {
        0.0
    } else {
        let var = lengths
            .iter()
            .map(|&l| (l as f64 - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        var.sqrt()
    };
    ((mean + 10.0 * std).floor() as usize).min(longest)
}
