//! Reference prefix captioner.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use super::decoder::CaptionDecoder;
use super::encoder::AudioEncoder;
use super::mapping::PrefixMapper;
use super::{AUDIO_ENCODER_PREFIX, CaptionModel, DECODER_PREFIX};
use crate::config::CaptionerConfig;
use crate::{Error, Result};

/// Audio encoder → prefix mapper → causal decoder.
#[derive(Debug, Clone)]
pub struct PrefixCaptioner {
    config: CaptionerConfig,
    audio_encoder: AudioEncoder,
    mapping: PrefixMapper,
    decoder: CaptionDecoder,
    training: bool,
    encoder_frozen: bool,
}

impl PrefixCaptioner {
    pub fn new(config: &CaptionerConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        if config.vocab_size == 0 {
            return Err(Error::Config("captioner vocab_size is not set".into()));
        }
        tracing::info!(
            vocab = config.vocab_size,
            hidden = config.hidden_size,
            layers = config.num_decoder_layers,
            prefix = config.prefix_length(),
            "building prefix captioner"
        );
        Ok(Self {
            config: config.clone(),
            audio_encoder: AudioEncoder::load(config, vb.pp(AUDIO_ENCODER_PREFIX))?,
            mapping: PrefixMapper::load(config, vb.pp("mapping"))?,
            decoder: CaptionDecoder::load(config, vb.pp(DECODER_PREFIX))?,
            training: true,
            encoder_frozen: false,
        })
    }

    pub fn config(&self) -> &CaptionerConfig {
        &self.config
    }
}

impl CaptionModel for PrefixCaptioner {
    fn audio_prefix_length(&self) -> usize {
        self.config.audio_prefix_length
    }

    fn semantic_prefix_length(&self) -> usize {
        self.config.semantic_prefix_length
    }

    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn max_positions(&self) -> usize {
        self.decoder.max_positions()
    }

    fn embed_prefix(&self, audio: &Tensor) -> Result<Tensor> {
        let frames = self.audio_encoder.forward(audio)?;
        let frames = if self.encoder_frozen {
            frames.detach()
        } else {
            frames
        };
        self.mapping.forward(&frames, self.training)
    }

    fn forward(
        &self,
        prefix: &Tensor,
        tokens: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        self.decoder
            .forward(prefix, tokens, attention_mask, self.training)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn set_audio_encoder_frozen(&mut self, frozen: bool) {
        self.encoder_frozen = frozen;
    }

    fn audio_encoder_frozen(&self) -> bool {
        self.encoder_frozen
    }
}
