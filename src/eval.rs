//! Caption generation and scoring.
//!
//! - [`decode`]: greedy and beam-search decoding over a [`CaptionModel`](crate::model::CaptionModel)
//! - [`metrics`]: the external metrics provider contract
//! - [`report`]: nine-metric per-epoch report
//! - [`evaluator`]: whole-split prediction and scoring

pub mod decode;
pub mod evaluator;
pub mod metrics;
pub mod report;

pub use decode::{DecodeStrategy, Hypothesis, beam_search, decode, greedy_decode};
pub use evaluator::Evaluator;
pub use metrics::{
    CommandMetricsProvider, MetricScore, MetricsProvider, PredictionRecord, ReferenceRecord,
};
pub use report::{EvaluationReport, REPORTED_METRICS};
