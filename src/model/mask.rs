//! Additive attention masks.
//!
//! Masks are `[B, 1, S, S]` (or `[1, 1, S, S]` without padding) with 0.0 for
//! visible positions and `f32::MIN` for hidden ones, added to the scores
//! before softmax.

use candle_core::{DType, Device, Result, Tensor};

const MASKED: f32 = f32::MIN;

/// Lower-triangular causal mask `[1, 1, seq_len, seq_len]`.
pub fn causal_mask(seq_len: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0f32; seq_len * seq_len];
    for i in 0..seq_len {
        for j in (i + 1)..seq_len {
            data[i * seq_len + j] = MASKED;
        }
    }
    Tensor::from_vec(data, (1, 1, seq_len, seq_len), device)
}

/// Key-padding mask `[B, 1, 1, S]` from a `[B, S]` validity mask (1 = keep).
pub fn padding_mask(valid: &Tensor) -> Result<Tensor> {
    let valid = valid.to_dtype(DType::F32)?;
    // (1 - valid) * MIN
    let bias = (valid.ones_like()? - valid)?.affine(f64::from(MASKED), 0.0)?;
    bias.unsqueeze(1)?.unsqueeze(1)
}

/// Combine an optional padding mask with an optional causal constraint.
///
/// Returns `None` when nothing is masked. Masked entries stay exactly
/// `f32::MIN` rather than summing to `-inf`.
pub fn attention_bias(
    valid: Option<&Tensor>,
    seq_len: usize,
    causal: bool,
    device: &Device,
) -> Result<Option<Tensor>> {
    let causal = if causal {
        Some(causal_mask(seq_len, device)?)
    } else {
        None
    };
    let padding = valid.map(padding_mask).transpose()?;
    Ok(match (causal, padding) {
        (Some(c), Some(p)) => Some(c.broadcast_minimum(&p)?),
        (Some(c), None) => Some(c),
        (None, Some(p)) => Some(p),
        (None, None) => None,
    })
}
