//! Token-level cross-entropy restricted to the caption region.

use candle_core::{D, DType, Tensor};

use crate::{Error, Result};

/// Mean negative log-likelihood over positions where `mask` is 1.
///
/// - `logits`: `[N, L, V]`
/// - `targets`: `[N, L]` u32
/// - `mask`: `[N, L]` f32, 0 for padding and the loss-ignore id
pub fn masked_cross_entropy(logits: &Tensor, targets: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let log_probs = candle_nn::ops::log_softmax(&logits.to_dtype(DType::F32)?, D::Minus1)?;
    let picked = log_probs
        .gather(&targets.to_dtype(DType::U32)?.unsqueeze(D::Minus1)?, D::Minus1)?
        .squeeze(D::Minus1)?;
    let mask = mask.to_dtype(DType::F32)?;
    let total = (picked * &mask)?.sum_all()?.neg()?;
    let count = mask.sum_all()?.maximum(1f32)?;
    Ok((total / count)?)
}

/// Loss of the caption tokens given full-sequence logits.
///
/// Position `prefix_length - 1 + i` predicts `tokens[:, i]`, so the last
/// prefix position is scored against the first caption token.
///
/// - `logits`: `[N, prefix_length + L, V]`
/// - `tokens`, `loss_mask`: `[N, L]`
pub fn caption_loss(
    logits: &Tensor,
    prefix_length: usize,
    tokens: &Tensor,
    loss_mask: &Tensor,
) -> Result<Tensor> {
    if prefix_length == 0 {
        return Err(Error::Config("caption loss needs at least one prefix position".into()));
    }
    let seq_len = tokens.dim(1)?;
    let logits = logits.narrow(1, prefix_length - 1, seq_len)?;
    masked_cross_entropy(&logits, tokens, loss_mask)
}
