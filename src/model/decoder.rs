//! Causal transformer language model over `[prefix ; token embeddings]`.

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Embedding, Linear, VarBuilder};

use super::layers::{LayerNorm, TransformerBlock, layer_norm};
use super::mask::attention_bias;
use crate::config::CaptionerConfig;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct CaptionDecoder {
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<TransformerBlock>,
    ln_f: LayerNorm,
    lm_head: Linear,
    max_positions: usize,
    device: Device,
}

impl CaptionDecoder {
    pub fn load(config: &CaptionerConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        let blocks = (0..config.num_decoder_layers)
            .map(|i| {
                TransformerBlock::load(
                    vb.pp(format!("h.{i}")),
                    hidden,
                    config.num_heads,
                    config.layer_norm_eps,
                    config.dropout,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            wte: candle_nn::embedding(config.vocab_size, hidden, vb.pp("wte"))?,
            wpe: candle_nn::embedding(config.max_positions, hidden, vb.pp("wpe"))?,
            blocks,
            ln_f: layer_norm(hidden, config.layer_norm_eps, vb.pp("ln_f"))?,
            lm_head: candle_nn::linear_no_bias(hidden, config.vocab_size, vb.pp("lm_head"))?,
            max_positions: config.max_positions,
            device: vb.device().clone(),
        })
    }

    pub fn max_positions(&self) -> usize {
        self.max_positions
    }

    /// Next-token logits `[B, P + L, V]`.
    ///
    /// - `prefix`: `[B, P, hidden]`
    /// - `tokens`: optional `[B, L]` u32 ids
    /// - `attention_mask`: optional `[B, P + L]` (1 = attend)
    pub fn forward(
        &self,
        prefix: &Tensor,
        tokens: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let hidden = match tokens {
            Some(tokens) => {
                let embedded = self.wte.forward(&tokens.to_dtype(DType::U32)?)?;
                Tensor::cat(&[prefix, &embedded], 1)?
            }
            None => prefix.clone(),
        };
        let seq_len = hidden.dim(1)?;
        if seq_len > self.max_positions {
            return Err(Error::Config(format!(
                "sequence of {seq_len} positions exceeds max_positions {}",
                self.max_positions
            )));
        }

        let positions = Tensor::arange(0u32, seq_len as u32, &self.device)?;
        let positions = self.wpe.forward(&positions)?.unsqueeze(0)?;
        let mut h = hidden.broadcast_add(&positions)?;

        let bias = attention_bias(attention_mask, seq_len, true, &self.device)?;
        for block in &self.blocks {
            h = block.forward(&h, bias.as_ref(), train)?;
        }
        let h = self.ln_f.forward(&h)?;
        Ok(self.lm_head.forward(&h)?)
    }
}
