//! Maps encoder frames to the fixed-length decoder prefix.
//!
//! The temporal part pools `T'` frames down to `audio_prefix_length`
//! positions; the semantic part projects the clip-level mean to
//! `semantic_prefix_length` vectors. Both are concatenated and refined by a
//! few bidirectional transformer blocks.

use candle_core::{Module, Tensor};
use candle_nn::{Linear, VarBuilder};

use super::layers::TransformerBlock;
use crate::Result;
use crate::config::CaptionerConfig;

#[derive(Debug, Clone)]
pub struct PrefixMapper {
    temporal_proj: Linear,
    semantic_proj: Option<Linear>,
    blocks: Vec<TransformerBlock>,
    audio_prefix_length: usize,
    semantic_prefix_length: usize,
    hidden_size: usize,
}

impl PrefixMapper {
    pub fn load(config: &CaptionerConfig, vb: VarBuilder) -> Result<Self> {
        let channels = config.encoder_channels;
        let hidden = config.hidden_size;
        let semantic_proj = if config.semantic_prefix_length > 0 {
            Some(candle_nn::linear(
                channels,
                config.semantic_prefix_length * hidden,
                vb.pp("semantic_proj"),
            )?)
        } else {
            None
        };
        let blocks = (0..config.num_mapping_layers)
            .map(|i| {
                TransformerBlock::load(
                    vb.pp(format!("blocks.{i}")),
                    hidden,
                    config.num_heads,
                    config.layer_norm_eps,
                    config.dropout,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            temporal_proj: candle_nn::linear(channels, hidden, vb.pp("temporal_proj"))?,
            semantic_proj,
            blocks,
            audio_prefix_length: config.audio_prefix_length,
            semantic_prefix_length: config.semantic_prefix_length,
            hidden_size: hidden,
        })
    }

    /// `[B, T', C]` encoder frames → `[B, P, hidden]` prefix.
    pub fn forward(&self, frames: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, _, _) = frames.dims3()?;
        let pooled = adaptive_mean_pool(frames, self.audio_prefix_length)?;
        let mut parts = vec![self.temporal_proj.forward(&pooled)?];

        if let Some(proj) = &self.semantic_proj {
            let global = frames.mean(1)?; // [B, C]
            let semantic = proj.forward(&global)?.reshape((
                batch,
                self.semantic_prefix_length,
                self.hidden_size,
            ))?;
            parts.push(semantic);
        }

        let mut prefix = Tensor::cat(&parts, 1)?;
        for block in &self.blocks {
            prefix = block.forward(&prefix, None, train)?;
        }
        Ok(prefix)
    }
}

/// Average `[B, T, C]` over `out_len` contiguous, possibly overlapping,
/// time windows. Works for `T < out_len` by repeating frames.
pub fn adaptive_mean_pool(frames: &Tensor, out_len: usize) -> Result<Tensor> {
    let (_, time, _) = frames.dims3()?;
    let windows = (0..out_len)
        .map(|i| {
            let start = (i * time / out_len).min(time.saturating_sub(1));
            let end = ((i + 1) * time).div_ceil(out_len).clamp(start + 1, time);
            frames.narrow(1, start, end - start)?.mean_keepdim(1)
        })
        .collect::<candle_core::Result<Vec<_>>>()?;
    Ok(Tensor::cat(&windows, 1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn pool_averages_equal_windows() {
        let frames = Tensor::arange(0f32, 6.0, &Device::Cpu)
            .unwrap()
            .reshape((1, 6, 1))
            .unwrap();
        let pooled = adaptive_mean_pool(&frames, 3).unwrap();
        let values: Vec<f32> = pooled.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(values, vec![0.5, 2.5, 4.5]);
    }

    #[test]
    fn pool_repeats_short_inputs() {
        let frames = Tensor::new(&[[[1f32], [3.]]], &Device::Cpu).unwrap();
        let pooled = adaptive_mean_pool(&frames, 4).unwrap();
        assert_eq!(pooled.dims(), &[1, 4, 1]);
        let values: Vec<f32> = pooled.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(values, vec![1.0, 1.0, 3.0, 3.0]);
    }

    #[test]
    fn prefix_has_audio_plus_semantic_positions() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let config = CaptionerConfig::tiny(20);
        let mapper = PrefixMapper::load(&config, vb).unwrap();
        let frames = Tensor::randn(0f32, 1.0, (2, 6, config.encoder_channels), &device).unwrap();
        let prefix = mapper.forward(&frames, false).unwrap();
        assert_eq!(prefix.dims(), &[2, config.prefix_length(), config.hidden_size]);
    }
}
