//! Cache command for inspecting and clearing cached query results.

use std::io::Write;

use anyhow::Result;
use clap::Subcommand;

use lz_db::QueryCache;

use crate::Config;

#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show how many results are cached for a shop.
    Status {
        #[arg(long)]
        shop: String,
    },
    /// Delete every cached result of a shop.
    Clear {
        #[arg(long)]
        shop: String,
    },
}

pub fn run<W: Write>(writer: &mut W, action: &CacheAction, config: &Config) -> Result<()> {
    let cache = QueryCache::new(&config.cache_dir);
    match action {
        CacheAction::Status { shop } => {
            let status = cache.status(shop)?;
            writeln!(
                writer,
                "{} cached result(s) for {shop} ({} bytes) in {}",
                status.entries,
                status.bytes,
                cache.root().display()
            )?;
        }
        CacheAction::Clear { shop } => {
            if cache.clear(shop)? {
                writeln!(writer, "Cleared cache for {shop}")?;
            } else {
                writeln!(writer, "No cache for {shop}")?;
            }
        }
    }
    Ok(())
}
