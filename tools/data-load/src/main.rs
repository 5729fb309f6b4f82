//! Data-load stage of the WSI MIL pipeline.
//!
//! Builds the slide dataset and the configured batch loader from a TOML
//! file, fetches the first batches, converts them to tensors and dumps the
//! first one for inspection.

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::backend::ndarray::{NdArray, NdArrayDevice};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use wsi_core::{setup_cli_logging, DataLoadConfig, LoaderKind, PipelineConfig};
use wsi_dataset::SlideDataset;
use wsi_loader::{BatchDumper, BatchSequence, MilLoader, WholeSlideLoader};
use wsi_model::{build_classifier, ModelScorer, WsiBatcher, WsiClassifierConfig};

type Backend = NdArray;

#[derive(Parser)]
#[command(name = "data-load")]
#[command(about = "Build the WSI dataset and dataloader and fetch batches", long_about = None)]
struct Cli {
    /// Pipeline configuration file (TOML with a [data_load] table)
    #[arg(short, long)]
    config: PathBuf,

    /// Number of batches to fetch
    #[arg(short, long, default_value = "1")]
    batches: usize,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_cli_logging(cli.verbose)?;

    let config = PipelineConfig::from_file(&cli.config)
        .with_context(|| format!("Invalid configuration {}", cli.config.display()))?
        .data_load;

    let dataset = SlideDataset::from_config(&config).context("Failed to build slide dataset")?;
    info!(
        "Class distribution: {:?}",
        dataset.class_distribution(config.num_classes)
    );

    let device = NdArrayDevice::default();
    let batcher = WsiBatcher::<Backend>::new(device.clone());

    info!("Using {} loader", config.loader);
    match config.loader {
        LoaderKind::WholeSlide => {
            let loader = WholeSlideLoader::from_config(dataset, &config)?;
            fetch_batches(loader, &config, &batcher, cli.batches)
        }
        LoaderKind::Mil => {
            let mil = config.mil()?;
            let model = build_classifier::<Backend>(
                &WsiClassifierConfig::new(config.num_classes),
                mil.patch_size.with_channels(3),
                config.backbone_weights.as_deref(),
                &device,
            )
            .context("Failed to build scoring model")?;
            let scorer = ModelScorer::new(model, device.clone());
            let loader = MilLoader::from_config(dataset, scorer, &config)?;
            fetch_batches(loader, &config, &batcher, cli.batches)
        }
    }
}

/// Fetches up to `requested` batches, skipping those whose slides could not be read
fn fetch_batches<L: BatchSequence>(
    mut loader: L,
    config: &DataLoadConfig,
    batcher: &WsiBatcher<Backend>,
    requested: usize,
) -> Result<()> {
    let total = requested.min(loader.len());
    info!("{} batches available, fetching {}", loader.len(), total);
    if total == 0 {
        warn!("Dataset holds fewer slides than BATCH_SIZE = {}", config.batch_size);
        return Ok(());
    }

    let dumper = config.x_y_batch_path.as_ref().map(BatchDumper::new);
    let mut dumped = false;
    let mut fetched = 0usize;
    let mut skipped = 0usize;

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("=>-"),
    );

    for index in 0..total {
        match loader.get_batch(index) {
            Ok(batch) => {
                let tensors = batcher.from_batch(&batch)?;
                info!(
                    "Batch {}: images {:?}, targets {:?}",
                    index,
                    tensors.images.dims(),
                    tensors.targets.dims()
                );

                if let (Some(dumper), false) = (&dumper, dumped) {
                    let (x_path, y_path) = dumper.dump(&batch)?;
                    info!("Wrote {} and {}", x_path.display(), y_path.display());
                    dumped = true;
                }
                fetched += 1;
            }
            Err(err) if err.is_recoverable() => {
                warn!("Skipping batch {}: {}", index, err);
                skipped += 1;
            }
            Err(err) => {
                pb.abandon();
                return Err(err).with_context(|| format!("Failed to assemble batch {}", index));
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message("Done");
    info!("Fetched {} batches, skipped {}", fetched, skipped);
    Ok(())
}
