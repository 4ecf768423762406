//! Caption datasets.
//!
//! - [`captions`]: CSV join from audio file name to five captions
//! - [`index`]: per-file training and evaluation records, `max_seq_len`
//! - [`collate`]: sentinel padding, masks and batch stacking
//! - [`loader`]: seeded shuffling and parallel audio loading

pub mod captions;
pub mod collate;
pub mod index;
pub mod loader;

/// Every audio file has exactly this many reference captions.
pub const CAPTIONS_PER_AUDIO: usize = 5;

pub use captions::CaptionTable;
pub use collate::{BatchCollator, CollatedSample, PaddedCaptions, TrainBatch};
pub use index::{EvalIndex, EvalSample, LOSS_IGNORE_ID, TrainIndex, TrainSample, max_seq_len};
pub use loader::{LoaderOptions, TrainLoader};
