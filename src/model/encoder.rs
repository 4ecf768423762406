//! Audio encoder: log-mel front-end followed by a small conv stack.
//!
//! ```text
//! [B, samples] → log-mel [B, n_mels, T] → per-band norm
//!   → conv(k3) → GELU → conv(k3, stride 2) → GELU → [B, T', C]
//! ```

use candle_core::{D, Device, Module, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, VarBuilder};

use crate::audio::mel::LogMel;
use crate::config::CaptionerConfig;
use crate::Result;

/// Frame-level audio features. All variables sit under the encoder's
/// `VarBuilder` prefix so they can be frozen as one group.
#[derive(Debug, Clone)]
pub struct AudioEncoder {
    mel: LogMel,
    conv_1: Conv1d,
    conv_2: Conv1d,
    device: Device,
}

impl AudioEncoder {
    pub fn load(config: &CaptionerConfig, vb: VarBuilder) -> Result<Self> {
        let n_mels = config.mel.n_mels;
        let channels = config.encoder_channels;
        let conv_1 = candle_nn::conv1d(
            n_mels,
            channels,
            3,
            Conv1dConfig {
                padding: 1,
                ..Default::default()
            },
            vb.pp("conv_1"),
        )?;
        let conv_2 = candle_nn::conv1d(
            channels,
            channels,
            3,
            Conv1dConfig {
                padding: 1,
                stride: 2,
                ..Default::default()
            },
            vb.pp("conv_2"),
        )?;
        Ok(Self {
            mel: LogMel::new(config.mel.clone()),
            conv_1,
            conv_2,
            device: vb.device().clone(),
        })
    }

    /// Log-mel features `[B, n_mels, T]`, normalized per band over time.
    pub fn features(&self, audio: &Tensor) -> Result<Tensor> {
        let rows: Vec<Vec<f32>> = audio.to_device(&Device::Cpu)?.to_vec2()?;
        let batch = rows.len();
        let n_mels = self.mel.config().n_mels;
        let mut frames = 0;
        let mut data = Vec::new();
        for row in &rows {
            let mel = self.mel.process(row);
            frames = mel.len() / n_mels;
            data.extend(mel);
        }
        let mel = Tensor::from_vec(data, (batch, n_mels, frames), &self.device)?;

        let mean = mel.mean_keepdim(D::Minus1)?;
        let centered = mel.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        Ok(centered.broadcast_div(&(var + 1e-5)?.sqrt()?)?)
    }

    /// Encode `[B, samples]` waveforms to `[B, T', C]`.
    pub fn forward(&self, audio: &Tensor) -> Result<Tensor> {
        let x = self.features(audio)?;
        let x = self.conv_1.forward(&x)?.gelu()?;
        let x = self.conv_2.forward(&x)?.gelu()?;
        Ok(x.transpose(1, 2)?.contiguous()?)
    }
}
