//! Autoregressive caption decoding from an audio prefix.
//!
//! There is no KV cache: every step re-runs the decoder over
//! `prefix + generated tokens`, which is affordable at caption lengths.

use candle_core::{D, DType, IndexOp, Tensor};

use crate::config::DecodeConfig;
use crate::model::CaptionModel;
use crate::{Error, Result};

/// How predicted captions are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    Greedy,
    Beam { width: usize },
}

impl DecodeStrategy {
    pub fn from_config(config: &DecodeConfig) -> Self {
        if config.beam_search {
            DecodeStrategy::Beam {
                width: config.beam_width,
            }
        } else {
            DecodeStrategy::Greedy
        }
    }
}

/// A partial or finished token sequence with its cumulative log-probability.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub tokens: Vec<u32>,
    pub log_prob: f32,
    pub finished: bool,
}

impl Hypothesis {
    /// Length-normalized log-probability.
    pub fn score(&self) -> f32 {
        self.log_prob / self.tokens.len().max(1) as f32
    }
}

/// Decode with `strategy` and return the best token sequence.
pub fn decode<M: CaptionModel + ?Sized>(
    model: &M,
    prefix: &Tensor,
    strategy: DecodeStrategy,
    eos_id: u32,
    max_length: usize,
) -> Result<Vec<u32>> {
    match strategy {
        DecodeStrategy::Greedy => greedy_decode(model, prefix, eos_id, max_length),
        DecodeStrategy::Beam { width } => {
            let beams = beam_search(model, prefix, eos_id, width, max_length)?;
            beams
                .into_iter()
                .next()
                .map(|h| h.tokens)
                .ok_or_else(|| Error::Config("beam search produced no hypothesis".into()))
        }
    }
}

/// Pick the most likely token at every step until `eos_id` or `max_length`.
///
/// `prefix` is `[1, P, hidden]`. The returned tokens include `eos_id` when
/// it was generated.
pub fn greedy_decode<M: CaptionModel + ?Sized>(
    model: &M,
    prefix: &Tensor,
    eos_id: u32,
    max_length: usize,
) -> Result<Vec<u32>> {
    let max_length = step_budget(model, prefix, max_length)?;
    let device = prefix.device();
    let mut tokens: Vec<u32> = Vec::with_capacity(max_length);
    for _ in 0..max_length {
        let input = if tokens.is_empty() {
            None
        } else {
            Some(Tensor::from_slice(&tokens, (1, tokens.len()), device)?)
        };
        let logits = last_logits(model, prefix, input.as_ref())?;
        let next = logits.i(0)?.argmax(D::Minus1)?.to_scalar::<u32>()?;
        tokens.push(next);
        if next == eos_id {
            break;
        }
    }
    Ok(tokens)
}

/// Fixed-width beam search. Hypotheses are ranked by length-normalized
/// log-probability; finished ones are carried forward unchanged.
///
/// Returns the final beam, best first.
pub fn beam_search<M: CaptionModel + ?Sized>(
    model: &M,
    prefix: &Tensor,
    eos_id: u32,
    width: usize,
    max_length: usize,
) -> Result<Vec<Hypothesis>> {
    if width == 0 {
        return Err(Error::Config("beam width must be at least 1".into()));
    }
    let max_length = step_budget(model, prefix, max_length)?;
    let (_, p, d) = prefix.dims3()?;
    let device = prefix.device();

    let mut beams = vec![Hypothesis {
        tokens: Vec::new(),
        log_prob: 0.0,
        finished: false,
    }];

    for step in 0..max_length {
        let active: Vec<&Hypothesis> = beams.iter().filter(|h| !h.finished).collect();
        if active.is_empty() {
            break;
        }
        let k = active.len();
        let prefixes = prefix.broadcast_as((k, p, d))?.contiguous()?;
        let input = if step == 0 {
            None
        } else {
            let flat: Vec<u32> = active.iter().flat_map(|h| h.tokens.iter().copied()).collect();
            Some(Tensor::from_vec(flat, (k, step), device)?)
        };
        let log_probs = candle_nn::ops::log_softmax(
            &last_logits(model, &prefixes, input.as_ref())?,
            D::Minus1,
        )?;
        let log_probs: Vec<Vec<f32>> = log_probs.to_vec2()?;

        let mut candidates: Vec<Hypothesis> =
            beams.iter().filter(|h| h.finished).cloned().collect();
        for (hyp, row) in active.iter().zip(log_probs.iter()) {
            for token in top_k(row, width) {
                let mut tokens = hyp.tokens.clone();
                tokens.push(token as u32);
                candidates.push(Hypothesis {
                    tokens,
                    log_prob: hyp.log_prob + row[token],
                    finished: token as u32 == eos_id,
                });
            }
        }
        candidates.sort_by(|a, b| b.score().total_cmp(&a.score()));
        candidates.truncate(width);
        beams = candidates;
    }

    beams.sort_by(|a, b| b.score().total_cmp(&a.score()));
    Ok(beams)
}

/// Logits of the final position, `[B, V]` in f32.
fn last_logits<M: CaptionModel + ?Sized>(
    model: &M,
    prefix: &Tensor,
    tokens: Option<&Tensor>,
) -> Result<Tensor> {
    let logits = model.forward(prefix, tokens, None)?;
    let seq_len = logits.dim(1)?;
    Ok(logits.i((.., seq_len - 1, ..))?.to_dtype(DType::F32)?)
}

/// Generation steps available before the sequence hits `max_positions`.
fn step_budget<M: CaptionModel + ?Sized>(model: &M, prefix: &Tensor, max_length: usize) -> Result<usize> {
    let p = prefix.dim(1)?;
    let room = model.max_positions().saturating_sub(p);
    if room == 0 {
        return Err(Error::Config(format!(
            "prefix of {p} positions leaves no room to decode (max_positions {})",
            model.max_positions()
        )));
    }
    Ok(max_length.min(room))
}

/// Indices of the `k` largest values, largest first.
fn top_k(values: &[f32], k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    let k = k.min(idx.len());
    if k == 0 {
        return Vec::new();
    }
    idx.select_nth_unstable_by(k - 1, |&a, &b| values[b].total_cmp(&values[a]));
    idx.truncate(k);
    idx.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    idx
}
