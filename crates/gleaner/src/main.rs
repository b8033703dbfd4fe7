//! gleaner: prepare class-balanced image annotation datasets.
//!
//! Reconciles image/label pairs, splits them into train/val/test,
//! normalizes label geometry and synthesizes augmented training samples
//! until every class reaches its target frequency.
//!
//! # Usage
//!
//! ```text
//! gleaner prepare --images data/images --labels data/labels --output out
//! gleaner prune out --remove weed
//! gleaner stats out
//! ```
//!
//! Logging goes to stderr and honors `RUST_LOG` (default `gleaner=info`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use gleaner_io::{DatasetRoots, DatasetStats, PipelineDriver, prune_output};
use gleaner_pipeline::config::{
    DEFAULT_ATTEMPTS_PER_SAMPLE, DEFAULT_BALANCE_FACTOR, DEFAULT_MIN_AREA, DEFAULT_MIN_SIDE,
    DEFAULT_MIN_VISIBILITY, DEFAULT_SEED, DEFAULT_TEST_FRAC, DEFAULT_TRAIN_FRAC, DEFAULT_VAL_FRAC,
};
use gleaner_pipeline::{GeometryFormat, PrepareConfig, TransformProfile};
use tracing_subscriber::EnvFilter;

/// Prepare class-balanced image annotation datasets.
#[derive(Parser)]
#[command(name = "gleaner", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile, split, normalize and balance a dataset into a new root.
    Prepare(PrepareArgs),
    /// Remove classes from a prepared dataset and renumber the rest.
    Prune(PruneArgs),
    /// Print per-split class counts of a prepared dataset.
    Stats(StatsArgs),
}

#[derive(Args)]
struct PrepareArgs {
    /// Directory with the source images.
    #[arg(long)]
    images: PathBuf,

    /// Directory with the source label files (defaults to `--images`).
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Output dataset root. Its `images/` and `labels/` are replaced.
    #[arg(long)]
    output: PathBuf,

    /// Training share.
    #[arg(long, default_value_t = DEFAULT_TRAIN_FRAC)]
    train_frac: f64,

    /// Validation share.
    #[arg(long, default_value_t = DEFAULT_VAL_FRAC)]
    val_frac: f64,

    /// Test share.
    #[arg(long, default_value_t = DEFAULT_TEST_FRAC)]
    test_frac: f64,

    /// Seed for the split and augmentation.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Per-class target as a multiple of the average class frequency.
    #[arg(long, default_value_t = DEFAULT_BALANCE_FACTOR)]
    balance_factor: f64,

    /// Minimum visible fraction of a transformed instance.
    #[arg(long, default_value_t = DEFAULT_MIN_VISIBILITY)]
    min_visibility: f64,

    /// Minimum bounding area of a transformed instance, in px².
    #[arg(long, default_value_t = DEFAULT_MIN_AREA)]
    min_area: f64,

    /// Minimum bounding side of a transformed instance, in px.
    #[arg(long, default_value_t = DEFAULT_MIN_SIDE)]
    min_side: f64,

    /// Attempts allowed per missing sample.
    #[arg(long, default_value_t = DEFAULT_ATTEMPTS_PER_SAMPLE, value_parser = clap::value_parser!(u32).range(1..))]
    attempts: u32,

    /// Geometry form written to the output labels.
    #[arg(long, value_enum, default_value_t = Format::Polygon)]
    format: Format,

    /// Built-in transform profile to draw from (repeatable; defaults to
    /// the standard set).
    #[arg(long = "profile", value_parser = clap::builder::PossibleValuesParser::new(TransformProfile::BUILTIN))]
    profiles: Vec<String>,

    /// Class names in id order, comma separated.
    #[arg(long, value_delimiter = ',')]
    names: Vec<String>,

    /// Class name to remove before splitting (repeatable).
    #[arg(long = "remove")]
    remove: Vec<String>,

    /// Read the configuration from a JSON file. Flags above are ignored.
    #[arg(long, conflicts_with = "config_json")]
    config: Option<PathBuf>,

    /// Full configuration as a JSON string. Flags above are ignored.
    #[arg(long)]
    config_json: Option<String>,

    /// Print the run summary as JSON instead of a report.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct PruneArgs {
    /// Prepared dataset root (containing `dataset.yaml`).
    root: PathBuf,

    /// Class name to remove (repeatable).
    #[arg(long = "remove", required = true)]
    remove: Vec<String>,
}

#[derive(Args)]
struct StatsArgs {
    /// Prepared dataset root (containing `dataset.yaml`).
    root: PathBuf,

    /// Print as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

/// Label geometry selection.
#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// Every instance as a polygon.
    Polygon,
    /// Every instance as a box.
    Box,
    /// Keep each instance's own form.
    Preserve,
}

impl From<Format> for GeometryFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Polygon => Self::Polygon,
            Format::Box => Self::Box,
            Format::Preserve => Self::Preserve,
        }
    }
}

/// Build a [`PrepareConfig`] from CLI arguments.
///
/// `--config` and `--config-json` replace every individual flag.
fn config_from_args(args: &PrepareArgs) -> Result<PrepareConfig, String> {
    if let Some(ref path) = args.config {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
        return serde_json::from_str(&text)
            .map_err(|e| format!("Error parsing {}: {e}", path.display()));
    }
    if let Some(ref json) = args.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    let profiles = if args.profiles.is_empty() {
        PrepareConfig::default().profiles
    } else {
        args.profiles
            .iter()
            .map(|name| TransformProfile::named(name).ok_or_else(|| format!("Unknown profile {name:?}")))
            .collect::<Result<_, _>>()?
    };

    Ok(PrepareConfig {
        train_frac: args.train_frac,
        val_frac: args.val_frac,
        test_frac: args.test_frac,
        seed: args.seed,
        balance_factor: args.balance_factor,
        min_visibility: args.min_visibility,
        min_area: args.min_area,
        min_side: args.min_side,
        attempts_per_sample: args.attempts,
        output_format: args.format.into(),
        profiles,
        remove_classes: args.remove.clone(),
        class_names: (!args.names.is_empty()).then(|| args.names.clone()),
    })
}

fn prepare(args: &PrepareArgs) -> Result<(), String> {
    let config = config_from_args(args)?;
    let roots = DatasetRoots {
        labels: args.labels.clone().unwrap_or_else(|| args.images.clone()),
        images: args.images.clone(),
        output: args.output.clone(),
    };
    let mut driver = PipelineDriver::new(config).map_err(|e| e.to_string())?;
    let summary = driver.run(&roots).map_err(|e| e.to_string())?;
    if args.json {
        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| format!("Error serializing summary: {e}"))?;
        println!("{json}");
    } else {
        println!("{}", summary.report());
    }
    Ok(())
}

fn prune(args: &PruneArgs) -> Result<(), String> {
    let remove: BTreeSet<String> = args.remove.iter().cloned().collect();
    let report = prune_output(&args.root, &remove).map_err(|e| e.to_string())?;
    println!(
        "Removed {} pairs, rewrote {} label files. Classes: {}",
        report.removed,
        report.rewritten,
        report.catalog.names().join(", "),
    );
    Ok(())
}

fn stats(args: &StatsArgs) -> Result<(), String> {
    let stats = DatasetStats::collect(&args.root).map_err(|e| e.to_string())?;
    if args.json {
        let json = serde_json::to_string_pretty(&stats)
            .map_err(|e| format!("Error serializing statistics: {e}"))?;
        println!("{json}");
    } else {
        println!("{}", stats.report());
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gleaner=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Prepare(args) => prepare(args),
        Command::Prune(args) => prune(args),
        Command::Stats(args) => stats(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}
