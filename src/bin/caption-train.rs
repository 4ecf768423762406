//! Train a prefix audio captioner.
//!
//! Reads an experiment config (JSON, every field optional), applies the
//! command-line overrides and runs the full epoch loop: a checkpoint per
//! epoch under `checkpoint_root`, evaluation reports under `eval_dir`.
//!
//! Prints a one-line JSON summary to stdout on success.

use std::path::PathBuf;

use audio_caption_rs::config::ExperimentConfig;
use audio_caption_rs::pipeline::CaptionPipeline;
use audio_caption_rs::train::format_hms;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "caption-train",
    about = "Train an audio captioning model",
    long_about = "Train a prefix audio captioner on a Clotho-layout dataset.\n\
                  Evaluation needs an external metrics command (--metrics-cmd or\n\
                  metrics.command in the config); without one it is skipped."
)]
struct Args {
    /// Experiment config (JSON). Defaults reproduce the Clotho experiment.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Names checkpoint and report files.
    #[arg(long)]
    run_name: Option<String>,

    /// Dataset root containing clotho_audio_files/ and clotho_csv_files/.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Metrics program and arguments, e.g. `--metrics-cmd python score.py`.
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    metrics_cmd: Option<Vec<String>>,

    /// Checkpoint to warm-start from, e.g. a finished AudioCaps run.
    #[arg(long)]
    init_checkpoint: Option<PathBuf>,

    /// Keep the audio encoder fixed for the whole run.
    #[arg(long)]
    freeze_encoder: bool,

    /// Keep the decoder fixed; only the encoder and prefix mapper train.
    #[arg(long)]
    freeze_decoder: bool,

    /// Stay on the CPU even when a GPU is available.
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
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.dataset.train_batch_size = batch_size;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(command) = args.metrics_cmd {
        config.metrics.command = command;
    }
    if let Some(path) = args.init_checkpoint {
        config.init_checkpoint = Some(path);
    }
    config.freeze_audio_encoder |= args.freeze_encoder;
    config.freeze_decoder |= args.freeze_decoder;
    config.validate()?;

    let device = if args.cpu {
        candle_core::Device::Cpu
    } else {
        candle_core::Device::cuda_if_available(0)?
    };
    tracing::info!("Using device: {:?}", device);

    let pipeline = CaptionPipeline::load(config, &device)
        .map_err(|e| anyhow::anyhow!("failed to build pipeline: {e}"))?;
    let metrics = pipeline.metrics_provider()?;
    let run_name = pipeline.config().run_name.clone();

    let mut training = pipeline.into_training_loop(metrics)?;
    let summary = training
        .run()
        .map_err(|e| anyhow::anyhow!("training failed: {e}"))?;

    let last = summary
        .checkpoints
        .last()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    println!(
        "{}",
        serde_json::json!({
            "run_name": run_name,
            "epochs": summary.epochs,
            "training_time": format_hms(summary.training_time),
            "last_checkpoint": last,
            "evaluations": summary.reports.len(),
            "skipped_evaluations": summary.skipped_evaluations,
        })
    );

    Ok(())
}
