//! Route command - show trigger filter decisions for object keys.

use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;
use serde::Serialize;
use strata_ingest::filter::{RoutingDecision, TriggerFilter};

use crate::{Config, OutputFormat};

/// Arguments for the route command.
#[derive(Debug, Args)]
pub struct RouteArgs {
    /// Object keys as they appear in the landing zone.
    #[arg(required = true)]
    pub keys: Vec<String>,
}

/// Routing decision for one key.
#[derive(Debug, Serialize)]
pub struct RouteRow {
    /// The object key.
    pub key: String,
    /// Matching rule id, absent when the key is ignored.
    pub rule: Option<String>,
}

/// Execute the route command.
///
/// # Errors
///
/// Returns an error if the configured suffixes do not form a valid filter.
pub fn execute(args: &RouteArgs, config: &Config) -> Result<()> {
    let rows = route(&args.keys, config)?;
    match config.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Text => {
            for row in &rows {
                match &row.rule {
                    Some(rule) => println!("{} {} {}", "invoke".green(), row.key, rule.dimmed()),
                    None => println!("{} {}", "ignore".yellow(), row.key),
                }
            }
        }
    }
    Ok(())
}

fn route(keys: &[String], config: &Config) -> Result<Vec<RouteRow>> {
    let filter = TriggerFilter::from_suffixes(config.pipeline.accepted_suffixes.iter().cloned())?;
    Ok(keys
        .iter()
        .map(|key| RouteRow {
            key: key.clone(),
            rule: match filter.route_key(key) {
                RoutingDecision::Matched(rule) => Some(rule.id().to_string()),
                RoutingDecision::Ignored => None,
            },
        })
        .collect())
}
