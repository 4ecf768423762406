//! Captioning models.
//!
//! The training loop and decoders only talk to [`CaptionModel`]. The
//! bundled implementation is [`PrefixCaptioner`]:
//!
//! - [`encoder`]: log-mel + conv audio encoder (the freezable group)
//! - [`mapping`]: frames → `audio_prefix_length + semantic_prefix_length` vectors
//! - [`decoder`]: causal transformer LM with an LM head
//! - [`attention`], [`layers`], [`mask`]: shared building blocks

pub mod attention;
pub mod captioner;
pub mod decoder;
pub mod encoder;
pub mod layers;
pub mod mapping;
pub mod mask;

use candle_core::Tensor;

use crate::Result;

pub use captioner::PrefixCaptioner;

/// Variable-name prefix of the audio encoder's parameters.
pub const AUDIO_ENCODER_PREFIX: &str = "audio_encoder";

/// Variable-name prefix of the language-model decoder's parameters.
pub const DECODER_PREFIX: &str = "decoder";

/// Audio-prefix language model.
pub trait CaptionModel {
    /// Number of temporal prefix vectors.
    fn audio_prefix_length(&self) -> usize;

    /// Number of clip-level prefix vectors.
    fn semantic_prefix_length(&self) -> usize;

    fn prefix_length(&self) -> usize {
        self.audio_prefix_length() + self.semantic_prefix_length()
    }

    fn vocab_size(&self) -> usize;

    /// Longest `prefix + tokens` sequence the model accepts.
    fn max_positions(&self) -> usize;

    /// `[B, samples]` waveforms → `[B, prefix_length, hidden]`.
    fn embed_prefix(&self, audio: &Tensor) -> Result<Tensor>;

    /// Next-token logits `[B, prefix_length + L, vocab]` for a prefix and
    /// optional `[B, L]` tokens with a `[B, prefix_length + L]` mask.
    fn forward(
        &self,
        prefix: &Tensor,
        tokens: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
    ) -> Result<Tensor>;

    /// Enable dropout.
    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;

    /// Stop gradients from reaching the audio encoder.
    fn set_audio_encoder_frozen(&mut self, frozen: bool);

    fn audio_encoder_frozen(&self) -> bool;
}
