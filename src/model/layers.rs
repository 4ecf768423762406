//! Pre-norm transformer block shared by the prefix mapper and the decoder.

use candle_core::{D, DType, Module, Tensor};
use candle_nn::{Dropout, Init, Linear, VarBuilder};

use super::attention::SelfAttention;
use crate::Result;

/// Layer normalization over the last dimension, written with plain tensor
/// ops so gradients reach both the input and the affine parameters.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub fn new(weight: Tensor, bias: Tensor, eps: f64) -> Self {
        Self { weight, bias, eps }
    }
}

impl Module for LayerNorm {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let dtype = xs.dtype();
        let xs = xs.to_dtype(DType::F32)?;
        let mean = xs.mean_keepdim(D::Minus1)?;
        let centered = xs.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        normed
            .to_dtype(dtype)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

/// Loads `weight` (ones) and `bias` (zeros) under `vb`.
pub fn layer_norm(dim: usize, eps: f64, vb: VarBuilder) -> Result<LayerNorm> {
    let weight = vb.get_with_hints(dim, "weight", Init::Const(1.0))?;
    let bias = vb.get_with_hints(dim, "bias", Init::Const(0.0))?;
    Ok(LayerNorm::new(weight, bias, eps))
}

/// `x + attn(ln1(x))`, then `x + mlp(ln2(x))` with a 4x GELU MLP.
#[derive(Debug, Clone)]
pub struct TransformerBlock {
    ln_1: LayerNorm,
    attn: SelfAttention,
    ln_2: LayerNorm,
    fc_in: Linear,
    fc_out: Linear,
    dropout: Dropout,
}

impl TransformerBlock {
    pub fn load(
        vb: VarBuilder,
        dim: usize,
        num_heads: usize,
        eps: f64,
        dropout: f32,
    ) -> Result<Self> {
        Ok(Self {
            ln_1: layer_norm(dim, eps, vb.pp("ln_1"))?,
            attn: SelfAttention::load(vb.pp("attn"), dim, num_heads)?,
            ln_2: layer_norm(dim, eps, vb.pp("ln_2"))?,
            fc_in: candle_nn::linear(dim, 4 * dim, vb.pp("mlp.fc_in"))?,
            fc_out: candle_nn::linear(4 * dim, dim, vb.pp("mlp.fc_out"))?,
            dropout: Dropout::new(dropout),
        })
    }

    /// - `hidden_states`: `[B, S, dim]`
    /// - `bias`: optional additive attention mask
    pub fn forward(&self, hidden_states: &Tensor, bias: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let residual = hidden_states;
        let h = self.ln_1.forward(hidden_states)?;
        let h = self.attn.forward(&h, bias)?;
        let h = (residual + self.dropout.forward(&h, train)?)?;

        let residual = &h;
        let m = self.ln_2.forward(&h)?;
        let m = self.fc_out.forward(&self.fc_in.forward(&m)?.gelu()?)?;
        Ok((residual + self.dropout.forward(&m, train)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Var};
    use candle_nn::VarMap;

    #[test]
    fn rows_are_normalized_then_scaled_and_shifted() {
        let device = Device::Cpu;
        let weight = Tensor::new(&[2f32, 2.0, 2.0, 2.0], &device).unwrap();
        let bias = Tensor::new(&[1f32, 1.0, 1.0, 1.0], &device).unwrap();
        let ln = LayerNorm::new(weight, bias, 1e-5);
        let x = Tensor::new(&[[1f32, 2.0, 3.0, 4.0], [-3.0, 0.0, 0.0, 3.0]], &device).unwrap();

        let y = ln.forward(&x).unwrap();
        let rows: Vec<Vec<f32>> = y.to_vec2().unwrap();
        for row in rows {
            let mean = row.iter().sum::<f32>() / 4.0;
            let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 4.0;
            assert!((mean - 1.0).abs() < 1e-4, "mean {mean}");
            assert!((var - 4.0).abs() < 1e-2, "var {var}");
        }
    }

    #[test]
    fn gradient_reaches_input_and_affine_parameters() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let ln = layer_norm(4, 1e-5, vb).unwrap();
        let x = Var::from_tensor(&Tensor::new(&[[1f32, 2.0, 3.0, 5.0]], &device).unwrap()).unwrap();
        let target = Tensor::new(&[[1f32, 0.0, 0.0, 0.0]], &device).unwrap();

        let loss = (ln.forward(x.as_tensor()).unwrap() - target)
            .unwrap()
            .sqr()
            .unwrap()
            .sum_all()
            .unwrap();
        let grads = loss.backward().unwrap();
        assert!(grads.get(x.as_tensor()).is_some());
        let data = varmap.data().lock().unwrap();
        assert_eq!(data.len(), 2);
        for (name, var) in data.iter() {
            assert!(grads.get(var.as_tensor()).is_some(), "{name} has no gradient");
        }
    }

    #[test]
    fn every_block_parameter_receives_a_gradient() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let block = TransformerBlock::load(vb, 8, 2, 1e-5, 0.0).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 3, 8), &device).unwrap();

        let out = block.forward(&x, None, true).unwrap();
        let grads = out.sqr().unwrap().sum_all().unwrap().backward().unwrap();
        for (name, var) in varmap.data().lock().unwrap().iter() {
            assert!(grads.get(var.as_tensor()).is_some(), "{name} has no gradient");
        }
    }
}
