//! Caption text cleanup.
//!
//! Raw reference captions are inconsistent about case, comma spacing and
//! terminal punctuation. [`CaptionNormalizer`] maps them to the exact form
//! the active tokenizer's vocabulary was built from:
//!
//! 1. lowercase
//! 2. commas re-attached to the preceding word (`word ,` → `word,`);
//!    runs of two or more commas and commas with no preceding word are dropped
//! 3. a trailing comma is removed
//! 4. the tokenizer's [`PunctuationPolicy`] is applied
//!
//! The transform is a pure function of the caption and the policy.

use serde::{Deserialize, Serialize};

/// Characters removed by [`PunctuationPolicy::StripPunctuation`].
pub const STRIPPED_PUNCTUATION: &[char] = &[',', '.', '!', '?', ';', ':', '"'];

/// Final punctuation step, fixed by the tokenizer variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunctuationPolicy {
    /// Remove every character in [`STRIPPED_PUNCTUATION`].
    StripPunctuation,
    /// Remove periods, keep commas.
    StripPeriods,
    /// Remove periods, then end the caption with exactly one period.
    TerminalPeriod,
}

/// Deterministic caption normalizer for one punctuation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptionNormalizer {
    policy: PunctuationPolicy,
}

impl CaptionNormalizer {
    pub fn new(policy: PunctuationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> PunctuationPolicy {
        self.policy
    }

    /// Normalize one raw caption. May return an empty string; callers decide
    /// whether that is an error.
    pub fn normalize(&self, raw: &str) -> String {
        let lowered = raw.to_lowercase();
        let mut caption = attach_commas(&lowered);

        if caption.ends_with(',') {
            caption.pop();
        }

        match self.policy {
            PunctuationPolicy::StripPunctuation => {
                collapse_whitespace(&caption.replace(STRIPPED_PUNCTUATION, " "))
            }
            PunctuationPolicy::StripPeriods => collapse_whitespace(&caption.replace('.', "")),
            PunctuationPolicy::TerminalPeriod => {
                let mut caption = collapse_whitespace(&caption.replace('.', ""));
                if !caption.is_empty() {
                    caption.push('.');
                }
                caption
            }
        }
    }
}

/// Split commas into their own tokens, then glue each lone comma onto the
/// word before it. Repeated commas (`,,`) are treated as stray punctuation.
fn attach_commas(text: &str) -> String {
    let spaced = text.replace(',', " , ");
    let tokens: Vec<&str> = spaced.split_whitespace().collect();

    let mut words: Vec<String> = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i] == "," {
            let run = tokens[i..].iter().take_while(|t| **t == ",").count();
            if run == 1
                && let Some(last) = words.last_mut()
            {
                last.push(',');
            }
            i += run;
        } else {
            words.push(tokens[i].to_string());
            i += 1;
        }
    }

    words.join(" ")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
