//! Strata CLI - inspect a data-lake deployment.
//!
//! The main entry point for the `strata` CLI binary.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use strata_cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;

    match cli.command {
        Commands::Plan(args) => strata_cli::commands::plan::execute(&args, &config),
        Commands::Policy(args) => strata_cli::commands::policy::execute(&args, &config),
        Commands::Schedule(args) => strata_cli::commands::schedule::execute(&args, &config),
        Commands::Route(args) => strata_cli::commands::route::execute(&args, &config),
    }
}
