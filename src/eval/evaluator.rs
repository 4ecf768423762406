//! Decode the whole evaluation split and score it in one metrics call.

use std::path::PathBuf;

use candle_core::{Device, Tensor};

use super::decode::{DecodeStrategy, decode};
use super::metrics::{MetricsProvider, PredictionRecord, ReferenceRecord};
use super::report::EvaluationReport;
use crate::Result;
use crate::audio::AudioFrameAdapter;
use crate::config::DecodeConfig;
use crate::dataset::{EvalIndex, EvalSample};
use crate::model::CaptionModel;
use crate::text::CaptionTokenizer;

pub struct Evaluator {
    index: EvalIndex,
    tokenizer: CaptionTokenizer,
    adapter: AudioFrameAdapter,
    strategy: DecodeStrategy,
    max_length: usize,
    metrics: Box<dyn MetricsProvider>,
    eval_dir: PathBuf,
    device: Device,
}

impl Evaluator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: EvalIndex,
        tokenizer: CaptionTokenizer,
        adapter: AudioFrameAdapter,
        decode: &DecodeConfig,
        metrics: Box<dyn MetricsProvider>,
        eval_dir: impl Into<PathBuf>,
        device: Device,
    ) -> Self {
        Self {
            index,
            tokenizer,
            adapter,
            strategy: DecodeStrategy::from_config(decode),
            max_length: decode.max_length,
            metrics,
            eval_dir: eval_dir.into(),
            device,
        }
    }

    pub fn index(&self) -> &EvalIndex {
        &self.index
    }

    /// Caption one evaluation sample. The model should be in eval mode.
    pub fn predict<M: CaptionModel + ?Sized>(&self, model: &M, sample: &EvalSample) -> Result<String> {
        let audio = self.adapter.load(&sample.audio_path)?;
        let len = audio.len();
        let audio = Tensor::from_vec(audio, (1, len), &self.device)?;
        let prefix = model.embed_prefix(&audio)?.detach();
        let tokens = decode(
            model,
            &prefix,
            self.strategy,
            self.tokenizer.eos_id(),
            self.max_length,
        )?;
        self.tokenizer.decode(&tokens)
    }

    /// Predict every sample, call the metrics provider once with all
    /// records, and persist the report for `(epoch, run_name)`.
    pub fn evaluate<M: CaptionModel + ?Sized>(
        &self,
        model: &M,
        epoch: usize,
        run_name: &str,
    ) -> Result<EvaluationReport> {
        let samples = self.index.samples();
        let mut predictions = Vec::with_capacity(samples.len());
        let mut references = Vec::with_capacity(samples.len());

        for (i, sample) in samples.iter().enumerate() {
            let caption = self.predict(model, sample)?;
            tracing::debug!(i, file = %sample.file_name, %caption, "predicted");
            predictions.push(PredictionRecord {
                file_name: sample.file_name.clone(),
                caption_predicted: caption,
            });
            references.push(ReferenceRecord::new(sample.file_name.clone(), &sample.captions));
        }

        let metrics = self.metrics.evaluate(&predictions, &references)?;
        let report = EvaluationReport::from_metrics(epoch, run_name, &metrics)?;
        let path = report.save(&self.eval_dir)?;
        tracing::info!(epoch, path = %path.display(), "evaluation results\n{}", report.table());
        Ok(report)
    }
}
