//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::cache::CacheAction;
use crate::commands::events::EventsArgs;
use crate::commands::import::ImportArgs;
use crate::commands::report::ReportArgs;

/// Leitzone delivery-duration reports.
///
/// Reconciles parcel events into per-region delivery durations and compares
/// the fallback start signals against the strict `E10` baseline.
#[derive(Debug, Parser)]
#[command(name = "lz", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build the leitzone report and proxy impact analysis for a shop.
    Report(ReportArgs),

    /// Dump every parcel event of one leitzone to CSV.
    Events(EventsArgs),

    /// Import shipments or parcel events from JSONL on stdin.
    Import(ImportArgs),

    /// Inspect or clear cached query results.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}
