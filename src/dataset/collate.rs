//! Caption padding and batch stacking.

use candle_core::{Device, Tensor};

use super::CAPTIONS_PER_AUDIO;
use super::index::LOSS_IGNORE_ID;
use crate::{Error, Result};

/// Fill value for positions past the end of a caption. Negative so it can
/// never be confused with a vocabulary id before the mask is taken.
const PAD_SENTINEL: i64 = -1;

/// The five captions of one audio sample, padded to a fixed length.
///
/// All vectors are row-major with one row per caption.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedCaptions {
    /// `[5, max_seq_len]`, padding replaced by 0.
    pub tokens: Vec<u32>,
    /// `[5, prefix_length + max_seq_len]`: prefix ones, then token validity.
    pub attention_mask: Vec<f32>,
    /// `[5, max_seq_len]`: 1 where the token contributes to the loss.
    pub loss_mask: Vec<f32>,
}

/// One loaded training sample, ready to be stacked.
#[derive(Debug, Clone)]
pub struct CollatedSample {
    pub file_name: String,
    pub audio: Vec<f32>,
    pub captions: PaddedCaptions,
}

/// A stacked training batch of `B` audio samples.
#[derive(Debug, Clone)]
pub struct TrainBatch {
    /// `[B, samples]` f32 waveforms.
    pub audio: Tensor,
    /// `[B * 5, max_seq_len]` u32, caption `j` of sample `i` at row `5 * i + j`.
    pub tokens: Tensor,
    /// `[B * 5, prefix_length + max_seq_len]` f32.
    pub attention_mask: Tensor,
    /// `[B * 5, max_seq_len]` f32.
    pub loss_mask: Tensor,
    pub file_names: Vec<String>,
}

impl TrainBatch {
    pub fn batch_size(&self) -> usize {
        self.file_names.len()
    }
}

/// Pads captions to `max_seq_len` and prepends the prefix region to the mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCollator {
    max_seq_len: usize,
    prefix_length: usize,
}

impl BatchCollator {
    pub fn new(max_seq_len: usize, prefix_length: usize) -> Self {
        Self {
            max_seq_len,
            prefix_length,
        }
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    pub fn prefix_length(&self) -> usize {
        self.prefix_length
    }

    /// Pad or truncate each caption independently.
    ///
    /// Validity is read off the sentinel-padded sequence; only then are the
    /// sentinel positions overwritten with 0.
    pub fn pad_tokens(&self, captions: &[Vec<u32>; CAPTIONS_PER_AUDIO]) -> PaddedCaptions {
        let len = self.max_seq_len;
        let mut tokens = Vec::with_capacity(CAPTIONS_PER_AUDIO * len);
        let mut attention_mask =
            Vec::with_capacity(CAPTIONS_PER_AUDIO * (self.prefix_length + len));
        let mut loss_mask = Vec::with_capacity(CAPTIONS_PER_AUDIO * len);

        for caption in captions {
            let mut padded: Vec<i64> = caption.iter().take(len).map(|&t| t as i64).collect();
            padded.resize(len, PAD_SENTINEL);

            let valid: Vec<bool> = padded.iter().map(|&t| t >= 0).collect();
            for t in padded.iter_mut().filter(|t| **t < 0) {
                *t = 0;
            }

            attention_mask.extend(std::iter::repeat_n(1.0, self.prefix_length));
            for (&t, &ok) in padded.iter().zip(valid.iter()) {
                let id = t as u32;
                tokens.push(id);
                attention_mask.push(if ok { 1.0 } else { 0.0 });
                loss_mask.push(if ok && id != LOSS_IGNORE_ID { 1.0 } else { 0.0 });
            }
        }

        PaddedCaptions {
            tokens,
            attention_mask,
            loss_mask,
        }
    }

    /// Stack loaded samples into batch tensors on `device`.
    pub fn collate(&self, samples: Vec<CollatedSample>, device: &Device) -> Result<TrainBatch> {
        let batch = samples.len();
        let Some(first) = samples.first() else {
            return Err(Error::Dataset("cannot collate an empty batch".into()));
        };
        let frame_len = first.audio.len();
        let rows = batch * CAPTIONS_PER_AUDIO;
        let width = self.prefix_length + self.max_seq_len;

        let mut audio = Vec::with_capacity(batch * frame_len);
        let mut tokens = Vec::with_capacity(rows * self.max_seq_len);
        let mut attention = Vec::with_capacity(rows * width);
        let mut loss = Vec::with_capacity(rows * self.max_seq_len);
        let mut file_names = Vec::with_capacity(batch);

        for sample in samples {
            if sample.audio.len() != frame_len {
                return Err(Error::Dataset(format!(
                    "{} has {} samples, expected {frame_len}",
                    sample.file_name,
                    sample.audio.len()
                )));
            }
            audio.extend_from_slice(&sample.audio);
            tokens.extend_from_slice(&sample.captions.tokens);
            attention.extend_from_slice(&sample.captions.attention_mask);
            loss.extend_from_slice(&sample.captions.loss_mask);
            file_names.push(sample.file_name);
        }

        Ok(TrainBatch {
            audio: Tensor::from_vec(audio, (batch, frame_len), device)?,
            tokens: Tensor::from_vec(tokens, (rows, self.max_seq_len), device)?,
            attention_mask: Tensor::from_vec(attention, (rows, width), device)?,
            loss_mask: Tensor::from_vec(loss, (rows, self.max_seq_len), device)?,
            file_names,
        })
    }
}
