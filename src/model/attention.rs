//! Multi-head scaled dot-product self-attention.

use candle_core::{D, Module, Tensor};
use candle_nn::VarBuilder;

use crate::Result;

/// Standard softmax self-attention over `[B, S, dim]` hidden states.
#[derive(Debug, Clone)]
pub struct SelfAttention {
    to_q: candle_nn::Linear,
    to_k: candle_nn::Linear,
    to_v: candle_nn::Linear,
    to_out: candle_nn::Linear,
    num_heads: usize,
    head_dim: usize,
}

impl SelfAttention {
    pub fn load(vb: VarBuilder, dim: usize, num_heads: usize) -> Result<Self> {
        let head_dim = dim / num_heads;
        let inner_dim = num_heads * head_dim;
        Ok(Self {
            to_q: candle_nn::linear(dim, inner_dim, vb.pp("to_q"))?,
            to_k: candle_nn::linear(dim, inner_dim, vb.pp("to_k"))?,
            to_v: candle_nn::linear(dim, inner_dim, vb.pp("to_v"))?,
            to_out: candle_nn::linear(inner_dim, dim, vb.pp("to_out"))?,
            num_heads,
            head_dim,
        })
    }

    /// Forward pass.
    ///
    /// - `hidden_states`: `[B, S, dim]`
    /// - `bias`: optional additive mask broadcastable to `[B, H, S, S]`
    pub fn forward(&self, hidden_states: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
        let (batch, seq_len, _) = hidden_states.dims3()?;

        // [B, S, inner] → [B, H, S, D]
        let split = |t: Tensor| -> candle_core::Result<Tensor> {
            t.reshape((batch, seq_len, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = split(self.to_q.forward(hidden_states)?)?;
        let k = split(self.to_k.forward(hidden_states)?)?;
        let v = split(self.to_v.forward(hidden_states)?)?;

        let scale = (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? / scale)?;
        let scores = match bias {
            Some(bias) => scores.broadcast_add(bias)?,
            None => scores,
        };

        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let out = weights.matmul(&v)?; // [B, H, S, D]
        let out = out
            .transpose(1, 2)?
            .reshape((batch, seq_len, self.num_heads * self.head_dim))?;

        self.to_out.forward(&out).map_err(Into::into)
    }
}
