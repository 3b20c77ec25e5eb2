//! CLI subcommand implementations.

pub mod cache;
pub mod events;
pub mod import;
pub mod report;
pub mod util;
