use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lz_cli::commands::{cache, events, import, report};
use lz_cli::{Cli, Commands, Config};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr; stdout carries command output.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let mut stdout = std::io::stdout().lock();
    match &cli.command {
        Some(Commands::Report(args)) => {
            report::run(&mut stdout, args, &config)?;
        }
        Some(Commands::Events(args)) => {
            events::run(&mut stdout, args, &config)?;
        }
        Some(Commands::Import(args)) => {
            let inserted = import::run(args, &config)?;
            tracing::info!(inserted, "import complete");
        }
        Some(Commands::Cache { action }) => {
            cache::run(&mut stdout, action, &config)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
