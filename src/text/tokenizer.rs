//! Uniform encode/decode over the two tokenizer backends.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use super::normalize::{CaptionNormalizer, PunctuationPolicy};
use super::vocab::{ClosedVocabVariant, ClosedVocabulary};
use crate::{Error, Result};

/// Tokenizer selection, fixed once per experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenizerConfig {
    /// Pretrained subword tokenizer (`tokenizer.json`).
    Subword {
        /// Local `tokenizer.json`. When absent, fetched from `hub_repo`.
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default = "default_hub_repo")]
        hub_repo: String,
        #[serde(default = "default_eos_token")]
        eos_token: String,
    },
    /// Closed word vocabulary stored as a JSON array.
    ClosedVocab {
        vocab_path: PathBuf,
        variant: ClosedVocabVariant,
    },
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        TokenizerConfig::Subword {
            path: None,
            hub_repo: default_hub_repo(),
            eos_token: default_eos_token(),
        }
    }
}

fn default_hub_repo() -> String {
    "gpt2".to_string()
}

fn default_eos_token() -> String {
    "<|endoftext|>".to_string()
}

/// Pretrained subword tokenizer with an explicit end-of-sequence id.
#[derive(Clone)]
pub struct SubwordTokenizer {
    inner: Tokenizer,
    eos_id: u32,
}

impl std::fmt::Debug for SubwordTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubwordTokenizer")
            .field("vocab_size", &self.inner.get_vocab_size(true))
            .field("eos_id", &self.eos_id)
            .finish()
    }
}

impl SubwordTokenizer {
    pub fn new(inner: Tokenizer, eos_token: &str) -> Result<Self> {
        let eos_id = inner.token_to_id(eos_token).ok_or_else(|| {
            Error::Config(format!("end-of-sequence token {eos_token:?} not in tokenizer"))
        })?;
        Ok(Self { inner, eos_id })
    }

    pub fn from_file(path: impl AsRef<Path>, eos_token: &str) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading subword tokenizer from {:?}", path);
        let inner = Tokenizer::from_file(path)?;
        Self::new(inner, eos_token)
    }

    /// Download `tokenizer.json` from the Hugging Face Hub (cached locally).
    pub fn from_hub(repo: &str, eos_token: &str) -> Result<Self> {
        let api = hf_hub::api::sync::Api::new()?;
        let path = api.model(repo.to_string()).get("tokenizer.json")?;
        Self::from_file(path, eos_token)
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self.inner.encode(text, false)?;
        let mut ids = encoding.get_ids().to_vec();
        ids.push(self.eos_id);
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let end = ids.iter().position(|&id| id == self.eos_id).unwrap_or(ids.len());
        Ok(self.inner.decode(&ids[..end], true)?.trim().to_string())
    }
}

/// Caption tokenizer: one of the two interchangeable backends.
#[derive(Debug, Clone)]
pub enum CaptionTokenizer {
    Subword(SubwordTokenizer),
    Closed(ClosedVocabulary),
}

impl CaptionTokenizer {
    pub fn from_config(config: &TokenizerConfig) -> Result<Self> {
        match config {
            TokenizerConfig::Subword {
                path: Some(path),
                eos_token,
                ..
            } => Ok(Self::Subword(SubwordTokenizer::from_file(path, eos_token)?)),
            TokenizerConfig::Subword {
                path: None,
                hub_repo,
                eos_token,
            } => Ok(Self::Subword(SubwordTokenizer::from_hub(hub_repo, eos_token)?)),
            TokenizerConfig::ClosedVocab {
                vocab_path,
                variant,
            } => Ok(Self::Closed(ClosedVocabulary::load(vocab_path, *variant)?)),
        }
    }

    /// Punctuation policy the captions must be normalized with.
    pub fn policy(&self) -> PunctuationPolicy {
        match self {
            CaptionTokenizer::Subword(_) => PunctuationPolicy::TerminalPeriod,
            CaptionTokenizer::Closed(vocab) => vocab.variant().policy(),
        }
    }

    pub fn normalizer(&self) -> CaptionNormalizer {
        CaptionNormalizer::new(self.policy())
    }

    /// Encode a normalized caption. The result always ends with [`Self::eos_id`].
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        match self {
            CaptionTokenizer::Subword(tok) => tok.encode(text),
            CaptionTokenizer::Closed(vocab) => vocab.encode(text),
        }
    }

    /// Decode ids, stopping at the first end-of-sequence id.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        match self {
            CaptionTokenizer::Subword(tok) => tok.decode(ids),
            CaptionTokenizer::Closed(vocab) => vocab.decode(ids),
        }
    }

    pub fn eos_id(&self) -> u32 {
        match self {
            CaptionTokenizer::Subword(tok) => tok.eos_id,
            CaptionTokenizer::Closed(_) => super::vocab::CLOSED_VOCAB_EOS_ID,
        }
    }

    pub fn vocab_size(&self) -> usize {
        match self {
            CaptionTokenizer::Subword(tok) => tok.inner.get_vocab_size(true),
            CaptionTokenizer::Closed(vocab) => vocab.len(),
        }
    }
}
