//! Events command: dumps every parcel event of one leitzone to CSV.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use lz_db::{LeitzoneQuery, QueryCache, cached_fetch};

use crate::Config;
use crate::commands::util::{
    default_run_id, open_database, resolve_since, run_dir, write_csv_with_metadata,
};

const HEADERS: [&str; 8] = [
    "id",
    "shipment_id",
    "event_key",
    "phase_key",
    "event_time",
    "zip_code",
    "country_code",
    "leitzone",
];

#[derive(Debug, Args)]
pub struct EventsArgs {
    /// Shop to report on.
    #[arg(long)]
    pub shop: String,

    /// Two-character postal code prefix, e.g. 94.
    #[arg(long)]
    pub leitzone: String,

    /// Lookback window in months (default from config).
    #[arg(long, conflicts_with = "since")]
    pub months: Option<u32>,

    /// Window start: ISO 8601 or relative ("30 days ago").
    #[arg(long)]
    pub since: Option<String>,

    /// Query the database even if a cached result exists.
    #[arg(long)]
    pub no_cache: bool,

    /// Output subdirectory name (default: current timestamp).
    #[arg(long)]
    pub run_id: Option<String>,
}

pub fn run<W: Write>(writer: &mut W, args: &EventsArgs, config: &Config) -> Result<PathBuf> {
    let leitzone = args.leitzone.trim();
    if leitzone.chars().count() != 2 || !leitzone.chars().all(char::is_alphanumeric) {
        anyhow::bail!(
            "leitzone must be two letters or digits, got {:?}",
            args.leitzone
        );
    }

    let now = Utc::now();
    let since = resolve_since(args.since.as_deref(), args.months, config, now)?;
    let query = LeitzoneQuery::new(&args.shop, since, &config.country_code, leitzone);

    let db = open_database(config)?;
    let cache = QueryCache::new(&config.cache_dir);
    let result = cached_fetch(&cache, !args.no_cache, &query.cache_key(), || {
        db.fetch_leitzone_events(&query)
    })
    .context("failed to fetch parcel events")?;

    let run_id = args.run_id.clone().unwrap_or_else(|| default_run_id(now));
    let out_dir = run_dir(config, &args.shop, &run_id)?;
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let path = out_dir.join(format!("parcel_events_leitzone_{leitzone}.csv"));

    let metadata = [
        ("Query executed at", result.metadata.execution_time.clone()),
        (
            "Query duration",
            format!("{:.2} seconds", result.metadata.duration_seconds),
        ),
        ("Shop ID", args.shop.clone()),
        ("Since", since.to_rfc3339()),
        ("Leitzone", leitzone.to_string()),
        ("Total records", result.data.len().to_string()),
    ];
    write_csv_with_metadata(&path, &metadata, &HEADERS, &result.data)?;

    writeln!(writer, "CSV file generated: {}", path.display())?;
    writeln!(
        writer,
        "Report contains {} parcel event entries for leitzone {leitzone}",
        result.data.len()
    )?;
    Ok(path)
}
