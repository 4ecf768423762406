//! Assembles a runnable experiment from an [`ExperimentConfig`].
//!
//! 1. Build the tokenizer and size the model's vocabulary from it
//! 2. Create the reference captioner on a fresh `VarMap`, restoring the
//!    warm-start checkpoint when one is configured
//! 3. Index the training and evaluation splits on demand
//! 4. Hand everything to a [`TrainingLoop`] or an [`Evaluator`]

use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};

use crate::audio::AudioFrameAdapter;
use crate::config::ExperimentConfig;
use crate::dataset::{CaptionTable, EvalIndex, LoaderOptions, TrainIndex, TrainLoader};
use crate::eval::{CommandMetricsProvider, Evaluator, MetricsProvider};
use crate::model::{CaptionModel, PrefixCaptioner};
use crate::text::CaptionTokenizer;
use crate::train::{TrainingLoop, load_checkpoint};
use crate::{Error, Result};

pub struct CaptionPipeline {
    config: ExperimentConfig,
    tokenizer: CaptionTokenizer,
    adapter: AudioFrameAdapter,
    varmap: VarMap,
    model: PrefixCaptioner,
    device: Device,
}

impl CaptionPipeline {
    /// Build the configured tokenizer, then the model.
    pub fn load(config: ExperimentConfig, device: &Device) -> Result<Self> {
        let tokenizer = CaptionTokenizer::from_config(&config.tokenizer)?;
        Self::with_tokenizer(config, tokenizer, device)
    }

    pub fn with_tokenizer(
        mut config: ExperimentConfig,
        tokenizer: CaptionTokenizer,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        let vocab_size = tokenizer.vocab_size();
        match config.model.vocab_size {
            0 => config.model.vocab_size = vocab_size,
            n if n != vocab_size => {
                return Err(Error::Config(format!(
                    "model vocab_size {n} does not match the tokenizer's {vocab_size}"
                )));
            }
            _ => {}
        }

        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = PrefixCaptioner::new(&config.model, vb)?;
        if let Some(path) = &config.init_checkpoint {
            load_checkpoint(&mut varmap, path)?;
            tracing::info!(path = %path.display(), "warm start");
        }
        let adapter = AudioFrameAdapter::new(config.dataset.sample_rate, config.dataset.clip_seconds);
        tracing::info!(device = ?device, vocab_size, run = %config.run_name, "pipeline ready");
        Ok(Self {
            config,
            tokenizer,
            adapter,
            varmap,
            model,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &CaptionTokenizer {
        &self.tokenizer
    }

    pub fn model(&self) -> &PrefixCaptioner {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut PrefixCaptioner {
        &mut self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Restore the model variables from a saved epoch.
    pub fn load_checkpoint(&mut self, path: impl AsRef<Path>) -> Result<()> {
        load_checkpoint(&mut self.varmap, path)
    }

    pub fn train_loader(&self) -> Result<TrainLoader> {
        let dataset = &self.config.dataset;
        let split = &dataset.train_split;
        let table = CaptionTable::load(dataset.captions_csv(split))?;
        let index = TrainIndex::build(dataset.audio_dir(split), &table, &self.tokenizer)?;
        if index.is_empty() {
            return Err(Error::Dataset(format!(
                "no audio files in {}",
                dataset.audio_dir(split).display()
            )));
        }
        TrainLoader::new(
            index,
            self.adapter,
            self.model.prefix_length(),
            LoaderOptions {
                batch_size: dataset.train_batch_size,
                shuffle: dataset.shuffle,
                drop_last: dataset.drop_last,
                seed: self.config.seed,
                workers: dataset.workers,
            },
        )
    }

    pub fn eval_index(&self) -> Result<EvalIndex> {
        let dataset = &self.config.dataset;
        let split = &dataset.eval_split;
        let table = CaptionTable::load(dataset.captions_csv(split))?;
        EvalIndex::build(dataset.audio_dir(split), &table, &self.tokenizer.normalizer())
    }

    /// The configured metrics command, if any.
    pub fn metrics_provider(&self) -> Result<Option<Box<dyn MetricsProvider>>> {
        if self.config.metrics.command.is_empty() {
            return Ok(None);
        }
        let provider = CommandMetricsProvider::from_command(&self.config.metrics.command)?;
        Ok(Some(Box::new(provider)))
    }

    pub fn evaluator(&self, metrics: Box<dyn MetricsProvider>) -> Result<Evaluator> {
        Ok(Evaluator::new(
            self.eval_index()?,
            self.tokenizer.clone(),
            self.adapter,
            &self.config.decode,
            metrics,
            &self.config.eval_dir,
            self.device.clone(),
        ))
    }

    /// Training loop over the configured splits. Evaluation is skipped
    /// when `metrics` is `None`.
    pub fn into_training_loop(
        self,
        metrics: Option<Box<dyn MetricsProvider>>,
    ) -> Result<TrainingLoop<PrefixCaptioner>> {
        let loader = self.train_loader()?;
        let evaluator = match metrics {
            Some(metrics) => Some(self.evaluator(metrics)?),
            None => {
                tracing::warn!("no metrics provider configured; evaluation disabled");
                None
            }
        };
        TrainingLoop::new(
            self.model,
            self.varmap,
            loader,
            evaluator,
            &self.config,
            self.device,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::write_wav;
    use crate::config::{CaptionerConfig, EvalScheduleConfig};
    use crate::eval::{MetricScore, PredictionRecord, ReferenceRecord};
    use crate::eval::report::tests::provider_scores;
    use crate::text::vocab::tests::sample_words;
    use crate::text::{ClosedVocabVariant, ClosedVocabulary};
    use std::collections::HashMap;

    const CAPTIONS: [&str; 5] = [
        "A dog barks loudly.",
        "Rain falls on the roof.",
        "The car passes by.",
        "A cat meows, then a dog barks.",
        "Then a cat meows.",
    ];

    struct FixedScores;

    impl MetricsProvider for FixedScores {
        fn evaluate(&self, _: &[PredictionRecord], _: &[ReferenceRecord]) -> Result<HashMap<String, MetricScore>> {
            Ok(provider_scores())
        }
    }

    fn write_split(root: &Path, split: &str, files: usize) {
        let audio_dir = root.join("clotho_audio_files").join(split);
        std::fs::create_dir_all(&audio_dir).unwrap();
        std::fs::create_dir_all(root.join("clotho_csv_files")).unwrap();
        let mut csv = String::from("file_name,caption_1,caption_2,caption_3,caption_4,caption_5\n");
        for i in 0..files {
            let name = format!("{split}_{i}.wav");
            let samples: Vec<f32> = (0..3200).map(|t| ((t * (i + 1)) as f32 * 0.01).sin() * 0.2).collect();
            write_wav(audio_dir.join(&name), &samples, 32_000, 1).unwrap();
            let quoted: Vec<String> = CAPTIONS.iter().map(|c| format!("\"{c}\"")).collect();
            csv.push_str(&format!("{name},{}\n", quoted.join(",")));
        }
        std::fs::write(
            root.join("clotho_csv_files")
                .join(format!("clotho_captions_{split}.csv")),
            csv,
        )
        .unwrap();
    }

    fn config(root: &Path) -> ExperimentConfig {
        let mut config = ExperimentConfig::default();
        config.run_name = "pipeline".into();
        config.epochs = 1;
        config.dataset.data_dir = root.to_path_buf();
        config.dataset.train_batch_size = 2;
        config.dataset.clip_seconds = 0.1;
        config.decode.beam_width = 2;
        config.decode.max_length = 3;
        config.evaluation = EvalScheduleConfig {
            first_epoch: 0,
            every: 1,
        };
        config.model = CaptionerConfig::tiny(0);
        config.checkpoint_root = root.join("Train_record");
        config.eval_dir = root.join("eval_result");
        config
    }

    fn tokenizer() -> CaptionTokenizer {
        CaptionTokenizer::Closed(
            ClosedVocabulary::from_words(sample_words(), ClosedVocabVariant::CommaSplit).unwrap(),
        )
    }

    #[test]
    fn vocab_size_is_taken_from_the_tokenizer() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = CaptionPipeline::with_tokenizer(config(dir.path()), tokenizer(), &Device::Cpu).unwrap();
        assert_eq!(pipeline.config().model.vocab_size, 20);
        assert_eq!(pipeline.model().vocab_size(), 20);

        let mut mismatched = config(dir.path());
        mismatched.model.vocab_size = 50_257;
        let err = CaptionPipeline::with_tokenizer(mismatched, tokenizer(), &Device::Cpu).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn no_metrics_command_means_no_provider() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = CaptionPipeline::with_tokenizer(config(dir.path()), tokenizer(), &Device::Cpu).unwrap();
        assert!(pipeline.metrics_provider().unwrap().is_none());
    }

    #[test]
    fn builds_splits_from_the_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), "development", 4);
        write_split(dir.path(), "evaluation", 2);
        let pipeline = CaptionPipeline::with_tokenizer(config(dir.path()), tokenizer(), &Device::Cpu).unwrap();

        let loader = pipeline.train_loader().unwrap();
        assert_eq!(loader.index().len(), 4);
        assert_eq!(loader.num_batches(), 2);
        assert_eq!(loader.collator().prefix_length(), 5);

        let eval = pipeline.eval_index().unwrap();
        assert_eq!(eval.len(), 2);
        assert_eq!(eval.samples()[0].captions[3], "a cat meows, then a dog barks");
    }

    #[test]
    fn one_epoch_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), "development", 4);
        write_split(dir.path(), "evaluation", 2);
        let pipeline = CaptionPipeline::with_tokenizer(config(dir.path()), tokenizer(), &Device::Cpu).unwrap();

        let mut run = pipeline.into_training_loop(Some(Box::new(FixedScores))).unwrap();
        let summary = run.run().unwrap();

        assert_eq!(summary.checkpoints.len(), 1);
        assert_eq!(summary.reports.len(), 1);
        assert!(dir.path().join("eval_result/epoch_0_pipeline.json").exists());

        let mut restored =
            CaptionPipeline::with_tokenizer(config(dir.path()), tokenizer(), &Device::Cpu).unwrap();
        restored.load_checkpoint(&summary.checkpoints[0]).unwrap();
    }

    #[test]
    fn init_checkpoint_is_restored_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let source = CaptionPipeline::with_tokenizer(config(dir.path()), tokenizer(), &Device::Cpu).unwrap();
        let path = dir.path().join("warm.safetensors");
        source.varmap().save(&path).unwrap();

        let mut warm = config(dir.path());
        warm.init_checkpoint = Some(path);
        let pipeline = CaptionPipeline::with_tokenizer(warm, tokenizer(), &Device::Cpu).unwrap();

        let expected = source.varmap().data().lock().unwrap();
        let restored = pipeline.varmap().data().lock().unwrap();
        assert_eq!(expected.len(), restored.len());
        for (name, var) in expected.iter() {
            let a: Vec<f32> = var.as_tensor().flatten_all().unwrap().to_vec1().unwrap();
            let b: Vec<f32> = restored[name].as_tensor().flatten_all().unwrap().to_vec1().unwrap();
            assert_eq!(a, b, "{name} was not restored");
        }
    }

    #[test]
    fn missing_init_checkpoint_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let mut warm = config(dir.path());
        warm.init_checkpoint = Some(dir.path().join("absent.safetensors"));
        assert!(CaptionPipeline::with_tokenizer(warm, tokenizer(), &Device::Cpu).is_err());
    }
}
