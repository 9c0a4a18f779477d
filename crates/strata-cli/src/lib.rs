//! # strata-cli
//!
//! Command-line interface for inspecting a Strata deployment.
//!
//! ## Commands
//!
//! - `strata plan` - Print every resource in creation order
//! - `strata policy <identity>` - Print a canonical policy document
//! - `strata schedule` - Show the next catalog schedule ticks
//! - `strata route <key>...` - Show which suffix rule a key routes to
//!
//! ## Configuration
//!
//! Settings come from the same `STRATA_*` environment variables the
//! pipeline reads. Flags override the deployment coordinates:
//!
//! - `STRATA_STAGE` - Deployment stage (default: `dev`)
//! - `STRATA_REGION` - Region
//! - `STRATA_ACCOUNT` - Account ID

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use strata_core::config::PipelineConfig;

/// Strata CLI - data-lake pipeline inspection.
#[derive(Debug, Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Deployment stage.
    #[arg(long, env = "STRATA_STAGE", default_value = "dev")]
    pub stage: String,

    /// Deployment region.
    #[arg(long, env = "STRATA_REGION")]
    pub region: Option<String>,

    /// Deployment account ID.
    #[arg(long, env = "STRATA_ACCOUNT")]
    pub account: Option<String>,

    /// Output format.
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration from flags and the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a `STRATA_*` variable is malformed or the
    /// resulting configuration is invalid.
    pub fn config(&self) -> Result<Config> {
        self.config_with(|key| std::env::var(key).ok())
    }

    /// Like [`Cli::config`], with an explicit variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is malformed or the resulting
    /// configuration is invalid.
    pub fn config_with<F>(&self, lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pipeline = PipelineConfig::from_env_with(|key| match key {
            "STRATA_STAGE" => Some(self.stage.clone()),
            "STRATA_REGION" => self.region.clone().or_else(|| lookup(key)),
            "STRATA_ACCOUNT" => self.account.clone().or_else(|| lookup(key)),
            _ => lookup(key),
        })?;
        Ok(Config {
            pipeline,
            format: self.format.clone(),
        })
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print every resource of the deployment in creation order.
    Plan(commands::plan::PlanArgs),
    /// Print the policy document of a pipeline identity.
    Policy(commands::policy::PolicyArgs),
    /// Show upcoming catalog schedule ticks.
    Schedule(commands::schedule::ScheduleArgs),
    /// Show how object keys are routed by the trigger filter.
    Route(commands::route::RouteArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
}

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pipeline settings the commands render.
    pub pipeline: PipelineConfig,
    /// Output format.
    pub format: OutputFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_config_from_flags() {
        let cli = Cli::parse_from([
            "strata",
            "--stage",
            "prod",
            "--account",
            "111122223333",
            "--format",
            "json",
            "plan",
        ]);

        let config = cli.config_with(|_| None).expect("config");
        assert_eq!(config.pipeline.stage, "prod");
        assert_eq!(config.pipeline.account, "111122223333");
        assert_eq!(config.pipeline.region, "eu-west-1");
        assert!(matches!(config.format, OutputFormat::Json));
    }

    #[test]
    fn test_environment_fills_unset_flags() {
        let cli = Cli::parse_from(["strata", "--stage", "qa", "route", "a.MF4"]);
        let config = cli
            .config_with(|key| match key {
                "STRATA_REGION" => Some("us-east-1".into()),
                "STRATA_ACCEPTED_SUFFIXES" => Some(".MF4".into()),
                _ => None,
            })
            .expect("config");
        assert_eq!(config.pipeline.region, "us-east-1");
        assert_eq!(config.pipeline.accepted_suffixes, vec![".MF4".to_string()]);
    }

    #[test]
    fn test_malformed_environment_is_an_error() {
        let cli = Cli::parse_from(["strata", "plan"]);
        let result = cli.config_with(|key| {
            (key == "STRATA_LANDING_RETENTION_DAYS").then(|| "forever".to_string())
        });
        assert!(result.is_err());
    }
}
