//! Run and inspect commensurability analyses.
//!
//! Usage:
//!   `commensurability run <config.toml> [-o out.cmsb] [--no-progress]`
//!   `commensurability inspect <file> [--dataset NAME]`

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commensurability_core::persistence::{AttrValue, Container, Dataset};
use commensurability_core::Analysis;
use config::RunConfig;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "commensurability")]
#[command(about = "Commensurability images of orbits in galactic potentials")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute an image from a TOML run description and save it
    Run {
        /// Path to the run configuration
        config: PathBuf,

        /// Output container (defaults to the config path with a .cmsb extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Disable progress reporting
        #[arg(long)]
        no_progress: bool,
    },
    /// Summarize a saved container
    Inspect {
        /// Path to the container
        file: PathBuf,

        /// Only show this dataset
        #[arg(long)]
        dataset: Option<String>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    init_logging();

    match Args::parse().command {
        Command::Run {
            config,
            output,
            no_progress,
        } => run(config, output, !no_progress),
        Command::Inspect { file, dataset } => inspect(file, dataset),
    }
}

fn run(config_path: PathBuf, output: Option<PathBuf>, progressbar: bool) -> Result<()> {
    let config = RunConfig::from_file(&config_path)?;
    let output = config.output_path(&config_path, output);
    info!(config = %config_path.display(), "Loaded run configuration");

    let analysis = Analysis::new(
        config.evaluator.build(),
        config.initial_conditions.clone(),
        config.axes(),
        config.potential.clone(),
        config.dt,
        config.steps,
        config.options(progressbar),
    )
    .context("Analysis failed")?;
    analysis
        .save(&output)
        .with_context(|| format!("Failed to save {}", output.display()))?;

    let image = analysis.image();
    let (min, max) = image
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    info!(
        output = %output.display(),
        shape = ?analysis.shape(),
        min,
        max,
        "Wrote commensurability image"
    );
    Ok(())
}

fn inspect(path: PathBuf, only: Option<String>) -> Result<()> {
    let container = Container::read(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let datasets: Vec<(&str, &Dataset)> = match only.as_deref() {
        Some(name) => vec![(name, container.dataset(name)?)],
        None => container
            .datasets
            .iter()
            .map(|(name, dataset)| (name.as_str(), dataset))
            .collect(),
    };

    for (name, dataset) in datasets {
        println!("{name}: shape {:?}", dataset.shape);
        if !dataset.data.is_empty() {
            let mean = dataset.data.iter().sum::<f64>() / dataset.data.len() as f64;
            let min = dataset.data.iter().copied().fold(f64::INFINITY, f64::min);
            let max = dataset.data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            println!("  measure: min {min:.6}, mean {mean:.6}, max {max:.6}");
        }
        for (key, value) in &dataset.attrs {
            println!("  {key} = {}", describe(value));
        }
    }
    Ok(())
}

fn describe(value: &AttrValue) -> String {
    match value {
        AttrValue::Blob(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => text.lines().map(str::trim).collect::<Vec<_>>().join(" "),
            Err(_) => format!("<{} bytes>", bytes.len()),
        },
        AttrValue::Text(text) => text.clone(),
        AttrValue::Float(value) => value.to_string(),
        AttrValue::UInt(value) => value.to_string(),
        AttrValue::Floats(values) if values.len() <= 8 => format!("{values:?}"),
        AttrValue::Floats(values) => format!(
            "[{} .. {}] ({} values)",
            values[0],
            values[values.len() - 1],
            values.len()
        ),
    }
}
