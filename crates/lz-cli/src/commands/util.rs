//! Shared utilities for CLI commands.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Months, NaiveTime, Utc};
use regex::Regex;
use serde::Serialize;

use lz_core::validate_path_segment;
use lz_db::Database;

use crate::Config;

/// Pre-compiled regex for relative time parsing.
static RELATIVE_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s+(day|week|month)s?\s+ago$").unwrap());

/// Conservative bound for relative time parsing (~1000 years in days).
const MAX_RELATIVE_DAYS: i64 = 1000 * 365;

/// Parse a datetime string as either ISO 8601 or relative time.
///
/// Supports:
/// - ISO 8601: "2026-01-15T10:30:00Z", used as given
/// - Relative: "3 days ago", "2 weeks ago", "6 months ago", truncated to
///   midnight UTC
pub fn parse_datetime(s: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let Some(caps) = RELATIVE_TIME_RE.captures(s.trim()) else {
        anyhow::bail!(
            "Invalid datetime: {s}. Use ISO 8601 (e.g., 2026-01-15T10:30:00Z) or relative (e.g., '6 months ago')"
        );
    };

    let n: i64 = caps[1]
        .parse()
        .context("failed to parse number in relative time")?;

    let days_per_unit = match &caps[2] {
        "day" => 1,
        "week" => 7,
        "month" => return months_before(now, n).map(start_of_day),
        unit => anyhow::bail!("Unknown time unit: {unit}"),
    };
    if n > MAX_RELATIVE_DAYS / days_per_unit {
        anyhow::bail!("Relative time value too large: {n} {}", &caps[2]);
    }
    Ok(start_of_day(now - Duration::days(n * days_per_unit)))
}

/// Midnight UTC of the day containing `dt`.
///
/// Relative windows are day-granular so their cache key is stable across
/// runs on the same day.
fn start_of_day(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn months_before(now: DateTime<Utc>, n: i64) -> Result<DateTime<Utc>> {
    let months = u32::try_from(n)
        .ok()
        .filter(|m| i64::from(*m) <= MAX_RELATIVE_DAYS / 28)
        .ok_or_else(|| anyhow::anyhow!("Relative time value too large: {n} months"))?;
    now.checked_sub_months(Months::new(months))
        .ok_or_else(|| anyhow::anyhow!("Relative time value too large: {n} months"))
}

/// Midnight UTC of the day `months` months before `now`.
pub fn window_start(now: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>> {
    let day = now
        .checked_sub_months(Months::new(months))
        .ok_or_else(|| anyhow::anyhow!("timeframe of {months} months is out of range"))?;
    Ok(start_of_day(day))
}

/// Resolves the report window from `--since` or `--months`, falling back to
/// the configured timeframe.
pub fn resolve_since(
    since: Option<&str>,
    months: Option<u32>,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    since.map_or_else(
        || window_start(now, months.unwrap_or(config.timeframe_months)),
        |since| parse_datetime(since, now),
    )
}

/// Output directory of one run: `<output_dir>/<shop>/<run_id>`.
///
/// Both names must be single path segments so the run stays below
/// `output_dir`.
pub fn run_dir(config: &Config, shop: &str, run_id: &str) -> Result<PathBuf> {
    validate_path_segment("shop ID", shop)?;
    validate_path_segment("run ID", run_id)?;
    Ok(config.output_dir.join(shop).join(run_id))
}

/// Default run identifier, e.g. `20250301_143000`.
pub fn default_run_id(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Opens the database, ensuring the parent directory exists.
pub fn open_database(config: &Config) -> Result<Database> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))
}

/// Writes a CSV file preceded by `# key: value` comment lines.
///
/// The header is written even when there are no rows.
pub fn write_csv_with_metadata<T: Serialize>(
    path: &Path,
    metadata: &[(&str, String)],
    headers: &[&str],
    rows: &[T],
) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for (key, value) in metadata {
        writeln!(out, "# {key}: {value}")?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(out);
    writer.write_record(headers)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Formats a count with `,` thousands separators.
pub fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
