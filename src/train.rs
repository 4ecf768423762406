//! Training.
//!
//! - [`schedule`]: cosine decay with linear warmup
//! - [`optim`]: AdamW per parameter group
//! - [`freeze`]: epoch-triggered encoder freezing
//! - [`loss`]: caption-region cross-entropy
//! - [`checkpoint`]: per-epoch safetensors files
//! - [`trainer`]: the epoch loop tying them together

pub mod checkpoint;
pub mod freeze;
pub mod loss;
pub mod optim;
pub mod schedule;
pub mod trainer;

pub use checkpoint::{checkpoint_dir, checkpoint_path, load_checkpoint, save_checkpoint};
pub use freeze::{FreezeAction, FreezeSchedule};
pub use loss::{caption_loss, masked_cross_entropy};
pub use optim::{GroupSizes, GroupedOptimizer};
pub use schedule::CosineWarmup;
pub use trainer::{TrainingLoop, TrainingSummary, format_hms};
