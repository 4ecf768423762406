//! Caption text processing.
//!
//! - [`normalize`]: variant-matched caption cleanup
//! - [`vocab`]: closed word vocabulary with exact-match lookup
//! - [`tokenizer`]: subword or closed-vocabulary backend behind one API

pub mod normalize;
pub mod tokenizer;
pub mod vocab;

pub use normalize::{CaptionNormalizer, PunctuationPolicy};
pub use tokenizer::{CaptionTokenizer, SubwordTokenizer, TokenizerConfig};
pub use vocab::{CLOSED_VOCAB_EOS_ID, ClosedVocabVariant, ClosedVocabulary};
