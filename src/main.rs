use anyhow::{Context, Result};
use burn::{backend::Autodiff, prelude::*};
use clap::Parser;
use std::path::{Path, PathBuf};
use texture_gan::model::{
    inference,
    training::{self, TrainingConfig},
};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "cuda")]
type MyBackend = burn::backend::Cuda<f32, i32>;
#[cfg(not(feature = "cuda"))]
type MyBackend = burn::backend::NdArray<f32>;

type MyAutodiffBackend = Autodiff<MyBackend>;

/// Translates edge maps into texture photos with a conditional GAN.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory holding `<id>-edges.png` / `<id>-image.png` pairs.
    #[arg(long, default_value = "./data/input/wood")]
    input_path: PathBuf,

    /// Where previews and predictions are written.
    #[arg(long, default_value = "./data/output")]
    output_path: PathBuf,

    #[arg(long, default_value = "./checkpoints")]
    checkpoints_path: PathBuf,

    /// Number of training epochs [default: 100].
    #[arg(long)]
    epochs: Option<usize>,

    /// Do not render preview panels during training.
    #[arg(long)]
    hide_plots: bool,

    /// Only run the latest checkpoint's generator over every edge map.
    #[arg(long)]
    evaluate: bool,

    /// Training configuration JSON, as written to `<checkpoints>/config.json`.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(path: &Path) -> Result<TrainingConfig> {
    TrainingConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}

/// `--config` wins, then the config saved next to the checkpoints, then defaults.
fn resolve_config(args: &Args) -> Result<TrainingConfig> {
    let saved = args.checkpoints_path.join("config.json");
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None if args.evaluate && saved.exists() => load_config(&saved)?,
        None => TrainingConfig::new(),
    };
    if let Some(epochs) = args.epochs {
        config.num_epochs = epochs;
    }
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = resolve_config(&args)?;

    for dir in [&args.output_path, &args.checkpoints_path] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let device = <MyBackend as Backend>::Device::default();

    if args.evaluate {
        let written = inference::evaluate::<MyBackend>(
            &args.input_path,
            &args.output_path,
            &args.checkpoints_path,
            &config.model.generator,
            device,
        )
        .context("evaluation failed")?;
        tracing::info!("wrote {} predictions", written.len());
    } else {
        let report = training::train::<MyAutodiffBackend>(
            &args.input_path,
            &args.output_path,
            &args.checkpoints_path,
            config,
            !args.hide_plots,
            device,
        )
        .context("training failed")?;
        tracing::info!(
            steps = report.steps,
            previews = report.previews,
            checkpoints = ?report.checkpoints,
            "training finished"
        );
    }

    Ok(())
}
