//! Leitzone report CLI library.
//!
//! This crate provides the CLI interface for the delivery-duration reports.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands};
pub use commands::cache::CacheAction;
pub use config::Config;
