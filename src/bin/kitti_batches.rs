//! Build a KITTI generator from a TOML config and walk its batches.
//!
//! Logs batch shapes, per-class box counts and the classification focal loss
//! of a uniform prediction, which is a quick sanity check of a dataset layout
//! before training.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kitti_fcos_rs::loss::reduce_mean;
use kitti_fcos_rs::{Batch, GeneratorConfig, Stage, Vocabulary};
use ndarray::{Array3, Zip};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "kitti_batches")]
#[command(about = "Assemble KITTI batches and report their contents", long_about = None)]
struct Cli {
    /// TOML generator configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Dataset stage: train, val or all
    #[arg(short, long, default_value = "train")]
    stage: Stage,

    /// Override the dataset root from the config
    #[arg(long)]
    root: Option<PathBuf>,

    /// Stop after this many batches per epoch
    #[arg(short, long)]
    batches: Option<usize>,

    #[arg(short, long, default_value = "1")]
    epochs: u64,

    /// Load samples of a batch in parallel
    #[arg(long)]
    parallel: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .context("failed to initialize logger")
}

/// Mean focal loss over real (unpadded) boxes for a uniform class prediction.
fn uniform_prediction_loss(cfg: &GeneratorConfig, batch: &Batch) -> Result<Option<f32>> {
    let dense = batch.dense_labels(cfg.max_boxes_per_image);
    let classes = dense.classes.dim().2;
    if classes == 0 {
        return Ok(None);
    }
    let y_pred = Array3::from_elem(dense.classes.dim(), 1.0 / classes as f32);
    let loss = cfg.loss.classification.compute(&dense.classes, &y_pred)?;
    let valid: Vec<f32> = Zip::from(&loss)
        .and(&dense.mask)
        .fold(Vec::new(), |mut acc, &l, &m| {
            if m > 0.0 {
                acc.push(l);
            }
            acc
        });
    Ok(reduce_mean(&ndarray::Array1::from(valid)))
}

fn report(
    cfg: &GeneratorConfig,
    vocabulary: &Vocabulary,
    index: usize,
    batch: &Batch,
) -> Result<()> {
    let mut counts = vec![0usize; vocabulary.num_classes()];
    for label in &batch.labels {
        for class in label.class_indices() {
            counts[class] += 1;
        }
    }
    let per_class: Vec<String> = counts
        .iter()
        .enumerate()
        .filter(|(_, n)| **n > 0)
        .filter_map(|(i, n)| vocabulary.decode(i).map(|name| format!("{name}={n}")))
        .collect();

    let (n, h, w, c) = batch.images.dim();
    info!(
        batch = index,
        shape = %format!("{n}x{h}x{w}x{c}"),
        boxes = counts.iter().sum::<usize>(),
        classes = %per_class.join(","),
        "assembled batch"
    );
    match uniform_prediction_loss(cfg, batch)? {
        Some(loss) => debug!(batch = index, loss, "uniform-prediction focal loss"),
        None => debug!(batch = index, "no boxes in batch"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let mut cfg = GeneratorConfig::from_path(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(root) = cli.root {
        cfg.root = root;
    }
    if cli.parallel {
        cfg.parallel_loading = true;
    }

    let vocabulary = cfg.vocabulary()?;
    let mut generator = cfg
        .build(cli.stage)
        .with_context(|| format!("building {} generator", cli.stage))?;
    if generator.is_empty() {
        warn!(root = %cfg.root.display(), stage = %cli.stage, "no samples found");
        return Ok(());
    }

    let limit = cli.batches.unwrap_or(generator.len());
    for epoch in 0..cli.epochs {
        info!(epoch, batches = limit.min(generator.len()), "starting epoch");
        for (index, batch) in generator.iter().take(limit).enumerate() {
            let batch = batch.with_context(|| format!("batch {index} of epoch {epoch}"))?;
            report(&cfg, &vocabulary, index, &batch)?;
        }
        generator.on_epoch_end();
    }
    Ok(())
}
