//! AdamW over three parameter groups: the audio encoder, the decoder and
//! everything else (the prefix mapper).

use candle_core::Var;
use candle_core::backprop::GradStore;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};

use crate::config::OptimizerConfig;
use crate::model::{AUDIO_ENCODER_PREFIX, DECODER_PREFIX};
use crate::{Error, Result};

struct ParamGroup {
    optimizer: AdamW,
    num_vars: usize,
    frozen: bool,
}

/// Variable counts per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSizes {
    pub audio_encoder: usize,
    pub decoder: usize,
    pub rest: usize,
}

/// One AdamW state per group. A frozen group is never stepped again.
pub struct GroupedOptimizer {
    audio_encoder: ParamGroup,
    decoder: ParamGroup,
    rest: ParamGroup,
}

impl GroupedOptimizer {
    pub fn new(varmap: &VarMap, config: &OptimizerConfig) -> Result<Self> {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| Error::Config("variable store lock poisoned".into()))?;
        let mut names: Vec<&String> = data.keys().collect();
        names.sort();

        let encoder_prefix = format!("{AUDIO_ENCODER_PREFIX}.");
        let decoder_prefix = format!("{DECODER_PREFIX}.");
        let (mut encoder, mut decoder, mut rest) = (Vec::new(), Vec::new(), Vec::new());
        for name in names {
            let var = data[name].clone();
            if name.starts_with(&encoder_prefix) {
                encoder.push(var);
            } else if name.starts_with(&decoder_prefix) {
                decoder.push(var);
            } else {
                rest.push(var);
            }
        }
        tracing::info!(
            audio_encoder = encoder.len(),
            decoder = decoder.len(),
            rest = rest.len(),
            "optimizer parameter groups"
        );

        let params = ParamsAdamW {
            lr: config.lr,
            beta1: config.beta1,
            beta2: config.beta2,
            eps: config.eps,
            weight_decay: config.weight_decay,
        };
        let group = |vars: Vec<Var>| -> Result<ParamGroup> {
            let num_vars = vars.len();
            Ok(ParamGroup {
                optimizer: AdamW::new(vars, params.clone())?,
                num_vars,
                frozen: false,
            })
        };
        Ok(Self {
            audio_encoder: group(encoder)?,
            decoder: group(decoder)?,
            rest: group(rest)?,
        })
    }

    fn groups_mut(&mut self) -> [&mut ParamGroup; 3] {
        [&mut self.audio_encoder, &mut self.decoder, &mut self.rest]
    }

    /// Apply one update to every unfrozen group.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        for group in self.groups_mut() {
            if !group.frozen {
                group.optimizer.step(grads)?;
            }
        }
        Ok(())
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        for group in self.groups_mut() {
            group.optimizer.set_learning_rate(lr);
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.rest.optimizer.learning_rate()
    }

    pub fn freeze_audio_encoder(&mut self) {
        self.audio_encoder.frozen = true;
    }

    pub fn audio_encoder_frozen(&self) -> bool {
        self.audio_encoder.frozen
    }

    /// Keep the decoder's weights fixed. Gradients still flow through it
    /// to the prefix mapper.
    pub fn freeze_decoder(&mut self) {
        self.decoder.frozen = true;
    }

    pub fn decoder_frozen(&self) -> bool {
        self.decoder.frozen
    }

    pub fn group_sizes(&self) -> GroupSizes {
        GroupSizes {
            audio_encoder: self.audio_encoder.num_vars,
            decoder: self.decoder.num_vars,
            rest: self.rest.num_vars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{Init, VarBuilder};

    struct Vars {
        varmap: VarMap,
        enc: Tensor,
        dec: Tensor,
        map: Tensor,
    }

    fn three_groups() -> Vars {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let get = |prefix: &str| vb.pp(prefix).get_with_hints(3, "w", Init::Const(1.0)).unwrap();
        let enc = get(AUDIO_ENCODER_PREFIX);
        let dec = get(DECODER_PREFIX);
        let map = get("mapping");
        Vars { varmap, enc, dec, map }
    }

    fn values(t: &Tensor) -> Vec<f32> {
        t.to_vec1().unwrap()
    }

    fn step_once(opt: &mut GroupedOptimizer, vars: &Vars) {
        let loss = (vars.enc.sum_all().unwrap() + vars.dec.sum_all().unwrap()).unwrap();
        let loss = (loss + vars.map.sum_all().unwrap()).unwrap();
        opt.step(&loss.backward().unwrap()).unwrap();
    }

    fn config() -> OptimizerConfig {
        OptimizerConfig {
            lr: 0.1,
            ..OptimizerConfig::default()
        }
    }

    #[test]
    fn partitions_by_module_prefix() {
        let Vars { varmap, .. } = three_groups();
        let opt = GroupedOptimizer::new(&varmap, &OptimizerConfig::default()).unwrap();
        assert_eq!(
            opt.group_sizes(),
            GroupSizes {
                audio_encoder: 1,
                decoder: 1,
                rest: 1
            }
        );
    }

    #[test]
    fn frozen_encoder_is_not_updated() {
        let vars = three_groups();
        let mut opt = GroupedOptimizer::new(&vars.varmap, &config()).unwrap();
        opt.freeze_audio_encoder();
        step_once(&mut opt, &vars);

        assert_eq!(values(&vars.enc), vec![1.0; 3]);
        assert!(values(&vars.dec).iter().all(|&v| v < 1.0));
        assert!(values(&vars.map).iter().all(|&v| v < 1.0));
    }

    #[test]
    fn frozen_decoder_is_not_updated_but_the_mapper_is() {
        let vars = three_groups();
        let mut opt = GroupedOptimizer::new(&vars.varmap, &config()).unwrap();
        opt.freeze_decoder();
        assert!(opt.decoder_frozen());
        assert!(!opt.audio_encoder_frozen());
        step_once(&mut opt, &vars);

        assert_eq!(values(&vars.dec), vec![1.0; 3]);
        assert!(values(&vars.enc).iter().all(|&v| v < 1.0));
        assert!(values(&vars.map).iter().all(|&v| v < 1.0));
    }

    #[test]
    fn learning_rate_propagates_to_every_group() {
        let Vars { varmap, .. } = three_groups();
        let mut opt = GroupedOptimizer::new(&varmap, &OptimizerConfig::default()).unwrap();
        opt.set_learning_rate(1e-3);
        assert!((opt.learning_rate() - 1e-3).abs() < 1e-15);
        assert!((opt.audio_encoder.optimizer.learning_rate() - 1e-3).abs() < 1e-15);
        assert!((opt.decoder.optimizer.learning_rate() - 1e-3).abs() < 1e-15);
    }
}
