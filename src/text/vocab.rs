//! Closed-vocabulary word tokenizer.
//!
//! Vocabularies are built offline from the training captions and stored as
//! a JSON array of words; a word's id is its position in that array. Id
//! [`CLOSED_VOCAB_EOS_ID`] is the end-of-sequence entry in every vocabulary.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::normalize::PunctuationPolicy;
use crate::{Error, Result};

/// End-of-sequence id shared by all closed vocabularies.
pub const CLOSED_VOCAB_EOS_ID: u32 = 13;

/// Which normalization a closed vocabulary was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosedVocabVariant {
    /// Built from captions with all punctuation removed.
    PunctuationFree,
    /// Built with periods removed and `,` as its own entry. A word with a
    /// glued trailing comma is looked up as two entries.
    CommaSplit,
    /// Built from lowercased captions only; words keep glued punctuation
    /// and every caption ends with a period.
    Lowercased,
}

impl ClosedVocabVariant {
    pub fn policy(self) -> PunctuationPolicy {
        match self {
            ClosedVocabVariant::PunctuationFree => PunctuationPolicy::StripPunctuation,
            ClosedVocabVariant::CommaSplit => PunctuationPolicy::StripPeriods,
            ClosedVocabVariant::Lowercased => PunctuationPolicy::TerminalPeriod,
        }
    }
}

/// Exact-match word vocabulary.
#[derive(Debug, Clone)]
pub struct ClosedVocabulary {
    words: Vec<String>,
    ids: HashMap<String, u32>,
    variant: ClosedVocabVariant,
}

impl ClosedVocabulary {
    pub fn from_words(words: Vec<String>, variant: ClosedVocabVariant) -> Result<Self> {
        if words.len() <= CLOSED_VOCAB_EOS_ID as usize {
            return Err(Error::Config(format!(
                "closed vocabulary has {} entries, needs more than {CLOSED_VOCAB_EOS_ID}",
                words.len()
            )));
        }
        let mut ids = HashMap::with_capacity(words.len());
        for (id, word) in words.iter().enumerate() {
            // First occurrence wins, like a front-to-back scan.
            ids.entry(word.clone()).or_insert(id as u32);
        }
        Ok(Self {
            words,
            ids,
            variant,
        })
    }

    /// Load a vocabulary stored as a JSON array of strings.
    pub fn load(path: impl AsRef<Path>, variant: ClosedVocabVariant) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let words: Vec<String> = serde_json::from_str(&data)?;
        tracing::info!(
            path = %path.display(),
            size = words.len(),
            ?variant,
            "loaded closed vocabulary"
        );
        Self::from_words(words, variant)
    }

    pub fn variant(&self) -> ClosedVocabVariant {
        self.variant
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn lookup(&self, word: &str, sentence: &str) -> Result<u32> {
        self.ids.get(word).copied().ok_or_else(|| {
            Error::Dataset(format!(
                "word {word:?} of caption {sentence:?} is not in the vocabulary"
            ))
        })
    }

    /// Encode a normalized caption, appending the end-of-sequence id.
    pub fn encode(&self, sentence: &str) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        for word in sentence.split(' ') {
            match word.strip_suffix(',') {
                Some(stem) if self.variant == ClosedVocabVariant::CommaSplit && !stem.is_empty() => {
                    ids.push(self.lookup(stem, sentence)?);
                    ids.push(self.lookup(",", sentence)?);
                }
                _ => ids.push(self.lookup(word, sentence)?),
            }
        }
        ids.push(CLOSED_VOCAB_EOS_ID);
        Ok(ids)
    }

    /// Decode ids up to the first end-of-sequence id.
    ///
    /// `.` and `,` are glued to the previous word and the first letter is
    /// capitalized.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        let mut sentence = String::new();
        for &id in ids {
            if id == CLOSED_VOCAB_EOS_ID {
                break;
            }
            let word = self.words.get(id as usize).ok_or_else(|| {
                Error::Tokenizer(crate::error::TokenizerError(format!(
                    "token id {id} outside vocabulary of {}",
                    self.words.len()
                )))
            })?;
            if word == "." || word == "," {
                sentence.pop();
            }
            sentence.push_str(word);
            sentence.push(' ');
        }
        Ok(capitalize(sentence.trim_end()))
    }
}

/// Uppercase the first character and lowercase the rest.
fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
