//! Evaluate a saved checkpoint on the evaluation split.
//!
//! Decodes every evaluation clip, scores the whole split with the metrics
//! command and writes `epoch_{epoch}_{run_name}.json` under `eval_dir`.
//! The score table is printed to stdout.

use std::path::PathBuf;

use audio_caption_rs::config::ExperimentConfig;
use audio_caption_rs::model::CaptionModel;
use audio_caption_rs::pipeline::CaptionPipeline;
use audio_caption_rs::train::checkpoint_path;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "caption-eval", about = "Score a trained audio captioning checkpoint")]
struct Args {
    /// Experiment config used for training.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Epoch to evaluate; resolves the checkpoint from the run name.
    #[arg(long, short = 'e')]
    epoch: usize,

    /// Explicit checkpoint file instead of the one derived from --epoch.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    #[arg(long)]
    run_name: Option<String>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Greedy decoding instead of beam search.
    #[arg(long)]
    greedy: bool,

    /// Metrics program and arguments.
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    metrics_cmd: Option<Vec<String>>,

    #[arg(long)]
    cpu: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ExperimentConfig::from_file(path)?,
        None => ExperimentConfig::default(),
    };
    if let Some(run_name) = args.run_name {
        config.run_name = run_name;
    }
    if let Some(data_dir) = args.data_dir {
        config.dataset.data_dir = data_dir;
    }
    if let Some(command) = args.metrics_cmd {
        config.metrics.command = command;
    }
    if args.greedy {
        config.decode.beam_search = false;
    }
    config.validate()?;

    let device = if args.cpu {
        candle_core::Device::Cpu
    } else {
        candle_core::Device::cuda_if_available(0)?
    };
    tracing::info!("Using device: {:?}", device);

    let checkpoint = args
        .checkpoint
        .unwrap_or_else(|| checkpoint_path(&config.checkpoint_root, &config.run_name, args.epoch));

    let mut pipeline = CaptionPipeline::load(config, &device)
        .map_err(|e| anyhow::anyhow!("failed to build pipeline: {e}"))?;
    pipeline
        .load_checkpoint(&checkpoint)
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", checkpoint.display()))?;
    pipeline.model_mut().set_training(false);

    let Some(metrics) = pipeline.metrics_provider()? else {
        anyhow::bail!("no metrics command configured; pass --metrics-cmd");
    };
    let evaluator = pipeline.evaluator(metrics)?;
    let report = evaluator.evaluate(pipeline.model(), args.epoch, &pipeline.config().run_name)?;

    println!("{}", report.table());
    Ok(())
}
