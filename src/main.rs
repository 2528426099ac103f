//! NDTiff dataset inspector.
//!
//! Opens an existing dataset read-only and prints its layout, summary
//! metadata, coordinates, and (optionally) raw index entries.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ndtiff::{serialize_axes, NDTiffStorage};

/// Inspect an NDTiff dataset.
#[derive(Parser, Debug)]
#[command(name = "ndtiff")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Dataset directory (the folder containing NDTiff.index or
    /// Full resolution/).
    dataset: PathBuf,

    /// Print the summary metadata as pretty JSON.
    #[arg(long)]
    summary: bool,

    /// List every coordinate in the dataset.
    #[arg(long)]
    axes: bool,

    /// Dump the raw index entries of the full-resolution level.
    #[arg(long)]
    index: bool,

    /// Emit the report as a single JSON object instead of text.
    #[arg(long)]
    json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

/// Machine-readable form of the inspection report.
#[derive(Serialize)]
struct Report {
    directory: String,
    tiled: bool,
    resolution_levels: u32,
    images: usize,
    size_bytes: u64,
    bounds: Option<[i64; 4]>,
    has_display_settings: bool,
    summary_metadata: Option<serde_json::Value>,
    axes: Option<Vec<String>>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let dataset = match NDTiffStorage::open(&args.dataset) {
        Ok(dataset) => dataset,
        Err(e) => {
            error!("couldn't open dataset: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        let report = Report {
            directory: dataset.disk_location().display().to_string(),
            tiled: dataset.is_tiled(),
            resolution_levels: dataset.num_res_levels(),
            images: dataset.axes_set().len(),
            size_bytes: dataset.dataset_size(),
            bounds: dataset.image_bounds(),
            has_display_settings: dataset.display_settings().is_some(),
            summary_metadata: args.summary.then(|| dataset.summary_metadata().clone()),
            axes: args.axes.then(|| sorted_axes_keys(&dataset)),
        };
        return match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("couldn't render report: {e}");
                ExitCode::FAILURE
            }
        };
    }

    println!("Dataset: {}", dataset.disk_location().display());
    println!("  tiled: {}", dataset.is_tiled());
    println!("  resolution levels: {}", dataset.num_res_levels());
    println!("  images: {}", dataset.axes_set().len());
    println!("  size on disk: {} bytes", dataset.dataset_size());
    if let Some([x_min, y_min, x_max, y_max]) = dataset.image_bounds() {
        println!("  bounds: [{x_min}, {y_min}, {x_max}, {y_max}]");
    }
    if dataset.display_settings().is_some() {
        println!("  display settings: present");
    }

    if args.summary {
        match serde_json::to_string_pretty(dataset.summary_metadata()) {
            Ok(pretty) => println!("\nSummary metadata:\n{pretty}"),
            Err(e) => {
                error!("couldn't render summary metadata: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if args.axes {
        println!("\nCoordinates:");
        for key in sorted_axes_keys(&dataset) {
            println!("  {key}");
        }
    }

    if args.index {
        let full_res = if args.dataset.join(ndtiff::FULL_RES_DIR).is_dir() {
            args.dataset.join(ndtiff::FULL_RES_DIR)
        } else {
            args.dataset.clone()
        };
        match ndtiff::read_index_map(&full_res.join(ndtiff::INDEX_FILE_NAME)) {
            Ok(map) => {
                println!("\nIndex entries:");
                for (key, entry) in &map {
                    println!(
                        "  {key} -> {} @ {} ({}x{}, {:?})",
                        entry.filename,
                        entry.pix_offset,
                        entry.pix_width,
                        entry.pix_height,
                        entry.pixel_type,
                    );
                }
            }
            Err(e) => {
                error!("couldn't read index: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

fn sorted_axes_keys(dataset: &NDTiffStorage) -> Vec<String> {
    let mut keys: Vec<String> = dataset.axes_set().iter().map(serialize_axes).collect();
    keys.sort();
    keys
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose { "ndtiff=debug" } else { "ndtiff=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
