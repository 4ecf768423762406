//! The epoch loop: step, checkpoint, evaluate, freeze.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use candle_core::Device;
use candle_nn::VarMap;

use super::checkpoint::save_checkpoint;
use super::freeze::{FreezeAction, FreezeSchedule};
use super::loss::caption_loss;
use super::optim::GroupedOptimizer;
use super::schedule::CosineWarmup;
use crate::config::{EvalScheduleConfig, ExperimentConfig};
use crate::dataset::{CAPTIONS_PER_AUDIO, TrainBatch, TrainLoader};
use crate::eval::{EvaluationReport, Evaluator};
use crate::model::CaptionModel;
use crate::{Error, Result};

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub epochs: usize,
    /// Wall-clock time spent in training batches, evaluation excluded.
    pub training_time: Duration,
    pub checkpoints: Vec<PathBuf>,
    pub reports: Vec<EvaluationReport>,
    /// Due epochs that produced no report.
    pub skipped_evaluations: Vec<usize>,
}

/// Owns the model, its variables and all optimizer state for one run.
pub struct TrainingLoop<M: CaptionModel> {
    model: M,
    varmap: VarMap,
    optimizer: GroupedOptimizer,
    scheduler: CosineWarmup,
    freeze: FreezeSchedule,
    loader: TrainLoader,
    evaluator: Option<Evaluator>,
    eval_schedule: EvalScheduleConfig,
    run_name: String,
    epochs: usize,
    checkpoint_root: PathBuf,
    device: Device,
}

impl<M: CaptionModel> TrainingLoop<M> {
    /// `varmap` must hold every variable of `model`.
    pub fn new(
        mut model: M,
        varmap: VarMap,
        loader: TrainLoader,
        evaluator: Option<Evaluator>,
        config: &ExperimentConfig,
        device: Device,
    ) -> Result<Self> {
        let steps_per_epoch = loader.num_batches();
        if steps_per_epoch == 0 {
            return Err(Error::Dataset(format!(
                "{} training samples make no batch of {}",
                loader.index().len(),
                config.dataset.train_batch_size
            )));
        }
        let mut optimizer = GroupedOptimizer::new(&varmap, &config.optimizer)?;
        let scheduler = CosineWarmup::from_config(&config.optimizer, config.epochs, steps_per_epoch);
        optimizer.set_learning_rate(scheduler.lr());
        if config.freeze_audio_encoder {
            model.set_audio_encoder_frozen(true);
            optimizer.freeze_audio_encoder();
        }
        if config.freeze_decoder {
            optimizer.freeze_decoder();
        }
        tracing::info!(
            epochs = config.epochs,
            steps_per_epoch,
            warmup = scheduler.warmup_steps(),
            total = scheduler.total_steps(),
            audio_encoder_frozen = optimizer.audio_encoder_frozen(),
            decoder_frozen = optimizer.decoder_frozen(),
            "prepared training run {}",
            config.run_name
        );
        Ok(Self {
            model,
            varmap,
            optimizer,
            scheduler,
            freeze: FreezeSchedule::for_dataset(config.dataset.kind),
            loader,
            evaluator,
            eval_schedule: config.evaluation.clone(),
            run_name: config.run_name.clone(),
            epochs: config.epochs,
            checkpoint_root: config.checkpoint_root.clone(),
            device,
        })
    }

    /// Replace the dataset's default freeze schedule.
    pub fn with_freeze_schedule(mut self, freeze: FreezeSchedule) -> Self {
        self.freeze = freeze;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn optimizer(&self) -> &GroupedOptimizer {
        &self.optimizer
    }

    pub fn scheduler(&self) -> &CosineWarmup {
        &self.scheduler
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Run every epoch. Stops at the first error except metrics failures,
    /// which only cost that epoch's report.
    pub fn run(&mut self) -> Result<TrainingSummary> {
        self.model.set_training(true);
        let mut training_time = Duration::ZERO;
        let mut checkpoints = Vec::with_capacity(self.epochs);
        let mut reports = Vec::new();
        let mut skipped_evaluations = Vec::new();

        for epoch in 0..self.epochs {
            let start = Instant::now();
            let loss = self.train_epoch(epoch)?;
            training_time += start.elapsed();
            tracing::info!(
                epoch,
                loss = format!("{loss:.4}"),
                lr = self.optimizer.learning_rate(),
                "epoch finished"
            );

            checkpoints.push(save_checkpoint(
                &self.varmap,
                &self.checkpoint_root,
                &self.run_name,
                epoch,
            )?);

            if self.eval_schedule.is_due(epoch) {
                match self.evaluate(epoch)? {
                    Some(report) => reports.push(report),
                    None => skipped_evaluations.push(epoch),
                }
            }

            for action in self.freeze.apply(epoch, &mut self.model) {
                match action {
                    FreezeAction::FreezeAudioEncoder => self.optimizer.freeze_audio_encoder(),
                }
            }
        }

        tracing::info!("training time {}", format_hms(training_time));
        if !skipped_evaluations.is_empty() {
            tracing::warn!(epochs = ?skipped_evaluations, "due evaluations without a report");
        }
        Ok(TrainingSummary {
            epochs: self.epochs,
            training_time,
            checkpoints,
            reports,
            skipped_evaluations,
        })
    }

    /// One pass over the training split. Returns the mean batch loss.
    pub fn train_epoch(&mut self, epoch: usize) -> Result<f32> {
        let batches = self.loader.epoch_batches();
        let mut total = 0f64;
        for (i, indices) in batches.iter().enumerate() {
            let batch = self.loader.load_batch(indices, &self.device)?;
            let loss = self.train_step(&batch)?;
            if !loss.is_finite() {
                return Err(Error::NonFiniteLoss {
                    epoch,
                    batch: i,
                    loss,
                });
            }
            tracing::debug!(epoch, batch = i, loss, lr = self.optimizer.learning_rate(), "step");
            total += loss as f64;
        }
        Ok((total / batches.len().max(1) as f64) as f32)
    }

    /// Forward, masked loss, backward and one optimizer + schedule step.
    pub fn train_step(&mut self, batch: &TrainBatch) -> Result<f32> {
        let prefix = self.model.embed_prefix(&batch.audio)?;
        let (b, p, d) = prefix.dims3()?;
        // One audio clip per group of five captions.
        let prefix = prefix
            .unsqueeze(1)?
            .broadcast_as((b, CAPTIONS_PER_AUDIO, p, d))?
            .contiguous()?
            .reshape((b * CAPTIONS_PER_AUDIO, p, d))?;

        let logits = self
            .model
            .forward(&prefix, Some(&batch.tokens), Some(&batch.attention_mask))?;
        let loss = caption_loss(&logits, p, &batch.tokens, &batch.loss_mask)?;
        let value = loss.to_scalar::<f32>()?;
        if !value.is_finite() {
            return Ok(value);
        }

        let grads = loss.backward()?;
        self.optimizer.step(&grads)?;
        self.scheduler.step();
        self.optimizer.set_learning_rate(self.scheduler.lr());
        Ok(value)
    }

    fn evaluate(&mut self, epoch: usize) -> Result<Option<EvaluationReport>> {
        let Some(evaluator) = &self.evaluator else {
            tracing::warn!(epoch, "evaluation due but no metrics provider is configured; skipped");
            return Ok(None);
        };
        self.model.set_training(false);
        let result = evaluator.evaluate(&self.model, epoch, &self.run_name);
        self.model.set_training(true);
        match result {
            Ok(report) => Ok(Some(report)),
            Err(Error::Metrics(e)) => {
                tracing::error!(epoch, "evaluation skipped: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// `H:MM:SS`, hours unbounded.
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFrameAdapter, write_wav};
    use crate::config::CaptionerConfig;
    use crate::dataset::{EvalIndex, EvalSample, LoaderOptions, TrainIndex, TrainSample};
    use crate::eval::{MetricScore, MetricsProvider, PredictionRecord, ReferenceRecord};
    use crate::eval::report::tests::provider_scores;
    use crate::model::PrefixCaptioner;
    use crate::text::vocab::tests::sample_words;
    use crate::text::{CaptionTokenizer, ClosedVocabVariant, ClosedVocabulary};
    use candle_core::DType;
    use candle_nn::VarBuilder;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::path::Path;
    use std::rc::Rc;

    struct CountingProvider {
        calls: Rc<Cell<usize>>,
        fail: bool,
    }

    impl MetricsProvider for CountingProvider {
        fn evaluate(
            &self,
            predictions: &[PredictionRecord],
            references: &[ReferenceRecord],
        ) -> Result<HashMap<String, MetricScore>> {
            assert_eq!(predictions.len(), references.len());
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(Error::Metrics("scorer unavailable".into()));
            }
            Ok(provider_scores())
        }
    }

    fn wav(dir: &Path, name: &str, level: f32) -> PathBuf {
        let path = dir.join(name);
        let samples: Vec<f32> = (0..1600).map(|i| level * (i as f32 * 0.05).sin()).collect();
        write_wav(&path, &samples, 16_000, 1).unwrap();
        path
    }

    fn loader(dir: &Path) -> TrainLoader {
        let samples = (0..4)
            .map(|i| TrainSample {
                file_name: format!("train_{i}.wav"),
                audio_path: wav(dir, &format!("train_{i}.wav"), 0.1 * (i + 1) as f32),
                tokens: [
                    vec![1, 2, 3, 13],
                    vec![6, 7, 13],
                    vec![8, 9, 12, 15, 14, 13],
                    vec![15, 16, 17, 18, 13],
                    vec![1, 6, 7, 4, 13],
                ],
            })
            .collect();
        let options = LoaderOptions {
            batch_size: 2,
            shuffle: true,
            drop_last: true,
            seed: 7,
            workers: Some(2),
        };
        TrainLoader::new(
            TrainIndex::from_samples(samples),
            AudioFrameAdapter::new(16_000, 0.1),
            5,
            options,
        )
        .unwrap()
    }

    fn evaluator(dir: &Path, calls: Rc<Cell<usize>>, fail: bool) -> Evaluator {
        let sample = EvalSample {
            file_name: "eval_0.wav".into(),
            audio_path: wav(dir, "eval_0.wav", 0.3),
            captions: std::array::from_fn(|i| format!("a dog barks {i}.")),
        };
        let tokenizer = CaptionTokenizer::Closed(
            ClosedVocabulary::from_words(sample_words(), ClosedVocabVariant::CommaSplit).unwrap(),
        );
        let mut config = ExperimentConfig::default();
        config.decode.beam_search = false;
        config.decode.max_length = 4;
        Evaluator::new(
            EvalIndex::from_samples(vec![sample]),
            tokenizer,
            AudioFrameAdapter::new(16_000, 0.1),
            &config.decode,
            Box::new(CountingProvider { calls, fail }),
            dir.join("eval_result"),
            Device::Cpu,
        )
    }

    fn config(dir: &Path, epochs: usize) -> ExperimentConfig {
        let mut config = ExperimentConfig::default();
        config.run_name = "tiny".into();
        config.epochs = epochs;
        config.dataset.train_batch_size = 2;
        config.optimizer.lr = 1e-3;
        config.evaluation = EvalScheduleConfig {
            first_epoch: 0,
            every: 1,
        };
        config.checkpoint_root = dir.join("Train_record");
        config.eval_dir = dir.join("eval_result");
        config
    }

    fn training_loop(dir: &Path, epochs: usize, evaluator: Option<Evaluator>) -> TrainingLoop<PrefixCaptioner> {
        training_loop_with(dir, &config(dir, epochs), evaluator)
    }

    fn training_loop_with(
        dir: &Path,
        config: &ExperimentConfig,
        evaluator: Option<Evaluator>,
    ) -> TrainingLoop<PrefixCaptioner> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = PrefixCaptioner::new(&CaptionerConfig::tiny(20), vb).unwrap();
        TrainingLoop::new(model, varmap, loader(dir), evaluator, config, Device::Cpu).unwrap()
    }

    type Weights = HashMap<String, candle_core::Tensor>;

    fn load_weights(path: &PathBuf) -> Weights {
        candle_core::safetensors::load(path, &Device::Cpu).unwrap()
    }

    /// Summed absolute change of every variable under `prefix`.
    fn changes(a: &Weights, b: &Weights, prefix: &str) -> Vec<(String, f32)> {
        let mut out: Vec<(String, f32)> = a
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, before)| {
                let diff: f32 = (before - &b[name])
                    .unwrap()
                    .abs()
                    .unwrap()
                    .sum_all()
                    .unwrap()
                    .to_scalar()
                    .unwrap();
                (name.clone(), diff)
            })
            .collect();
        out.sort_by(|x, y| x.0.cmp(&y.0));
        assert!(!out.is_empty(), "no variables under {prefix}");
        out
    }

    #[test]
    fn format_hms_pads_minutes_and_seconds() {
        assert_eq!(format_hms(Duration::from_secs(0)), "0:00:00");
        assert_eq!(format_hms(Duration::from_secs(3_725)), "1:02:05");
        assert_eq!(format_hms(Duration::from_secs(100 * 3600 + 59)), "100:00:59");
    }

    #[test]
    fn learning_rate_starts_at_zero_and_steps_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = training_loop(dir.path(), 3, None);
        assert_eq!(run.optimizer().learning_rate(), 0.0);
        run.train_epoch(0).unwrap();
        assert_eq!(run.scheduler().current_step(), 2);
        assert!(run.optimizer().learning_rate() > 0.0);
    }

    #[test]
    fn run_checkpoints_every_epoch_and_evaluates_once_per_due_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Rc::new(Cell::new(0));
        let mut run = training_loop(dir.path(), 2, Some(evaluator(dir.path(), calls.clone(), false)));

        let summary = run.run().unwrap();

        assert_eq!(summary.epochs, 2);
        assert_eq!(summary.checkpoints.len(), 2);
        assert!(summary.checkpoints.iter().all(|p| p.exists()));
        assert!(
            dir.path()
                .join("Train_record/params_tiny/Param_epoch_1.safetensors")
                .exists()
        );
        assert_eq!(calls.get(), 2);
        assert_eq!(summary.reports.len(), 2);
        assert!(dir.path().join("eval_result/epoch_0_tiny.json").exists());
        assert!(run.model().is_training());
    }

    #[test]
    fn metrics_failure_skips_the_report_but_not_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Rc::new(Cell::new(0));
        let mut run = training_loop(dir.path(), 2, Some(evaluator(dir.path(), calls.clone(), true)));

        let summary = run.run().unwrap();

        assert_eq!(calls.get(), 2);
        assert!(summary.reports.is_empty());
        assert_eq!(summary.skipped_evaluations, vec![0, 1]);
        assert_eq!(summary.checkpoints.len(), 2);
        assert!(!dir.path().join("eval_result/epoch_0_tiny.json").exists());
    }

    #[test]
    fn freezing_stops_encoder_updates_for_the_rest_of_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = training_loop(dir.path(), 3, None).with_freeze_schedule(FreezeSchedule::new(
            vec![(1, FreezeAction::FreezeAudioEncoder)],
        ));
        let summary = run.run().unwrap();
        assert!(run.model().audio_encoder_frozen());
        assert!(run.optimizer().audio_encoder_frozen());

        let ckpt: Vec<Weights> = summary.checkpoints.iter().map(load_weights).collect();
        // Epoch 1 still trains the encoder; the freeze applies after its checkpoint.
        for (name, diff) in changes(&ckpt[0], &ckpt[1], "audio_encoder.") {
            assert!(diff > 0.0, "{name} did not train before the freeze");
        }
        for (name, diff) in changes(&ckpt[1], &ckpt[2], "audio_encoder.") {
            assert_eq!(diff, 0.0, "{name} changed after freezing");
        }
        for (name, diff) in changes(&ckpt[1], &ckpt[2], "decoder.") {
            assert!(diff > 0.0, "{name} stopped training");
        }
    }

    #[test]
    fn every_module_trains_after_warmup() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = training_loop(dir.path(), 2, None);
        let summary = run.run().unwrap();

        let ckpt: Vec<Weights> = summary.checkpoints.iter().map(load_weights).collect();
        for prefix in ["audio_encoder.", "mapping.", "decoder."] {
            for (name, diff) in changes(&ckpt[0], &ckpt[1], prefix) {
                assert!(diff > 0.0, "{name} received no update");
            }
        }
    }

    #[test]
    fn configured_freezes_hold_from_the_first_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), 2);
        config.freeze_audio_encoder = true;
        config.freeze_decoder = true;
        let mut run = training_loop_with(dir.path(), &config, None);
        assert!(run.model().audio_encoder_frozen());
        assert!(run.optimizer().audio_encoder_frozen());
        assert!(run.optimizer().decoder_frozen());

        let summary = run.run().unwrap();
        let ckpt: Vec<Weights> = summary.checkpoints.iter().map(load_weights).collect();
        for prefix in ["audio_encoder.", "decoder."] {
            for (name, diff) in changes(&ckpt[0], &ckpt[1], prefix) {
                assert_eq!(diff, 0.0, "{name} changed while frozen");
            }
        }
        for (name, diff) in changes(&ckpt[0], &ckpt[1], "mapping.") {
            assert!(diff > 0.0, "{name} did not train through the frozen decoder");
        }
    }

    #[test]
    fn due_epochs_without_an_evaluator_are_reported_as_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), 3);
        config.evaluation = EvalScheduleConfig {
            first_epoch: 1,
            every: 1,
        };
        let mut run = training_loop_with(dir.path(), &config, None);
        let summary = run.run().unwrap();
        assert!(summary.reports.is_empty());
        assert_eq!(summary.skipped_evaluations, vec![1, 2]);
    }
}
