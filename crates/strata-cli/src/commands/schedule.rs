//! Schedule command - show upcoming catalog ticks.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use owo_colors::OwoColorize;
use strata_catalog::schedule::ScheduleEvaluator;

use crate::{Config, OutputFormat};

/// Arguments for the schedule command.
#[derive(Debug, Args)]
pub struct ScheduleArgs {
    /// Number of ticks to show.
    #[arg(long, short = 'n', default_value = "5")]
    pub count: usize,

    /// Start from this RFC 3339 instant instead of now.
    #[arg(long)]
    pub after: Option<DateTime<Utc>>,
}

/// Execute the schedule command.
///
/// # Errors
///
/// Returns an error if the configured schedule or timezone is invalid.
pub fn execute(args: &ScheduleArgs, config: &Config) -> Result<()> {
    let ticks = upcoming(args, config)?;
    match config.format {
        OutputFormat::Json => {
            let body = serde_json::json!({
                "schedule": config.pipeline.catalog_schedule,
                "timezone": config.pipeline.catalog_schedule_timezone,
                "armed": config.pipeline.catalog_schedule_armed,
                "ticks": ticks,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Text => {
            let state = if config.pipeline.catalog_schedule_armed {
                "armed".green().to_string()
            } else {
                "disarmed".yellow().to_string()
            };
            println!(
                "{} in {} ({state})",
                config.pipeline.catalog_schedule.bold(),
                config.pipeline.catalog_schedule_timezone
            );
            println!();
            for tick in &ticks {
                println!("  {}", tick.to_rfc3339());
            }
        }
    }
    Ok(())
}

fn upcoming(args: &ScheduleArgs, config: &Config) -> Result<Vec<DateTime<Utc>>> {
    let evaluator = ScheduleEvaluator::new(
        &config.pipeline.catalog_schedule,
        &config.pipeline.catalog_schedule_timezone,
    )?;
    Ok(evaluator.upcoming(args.after.unwrap_or_else(Utc::now), args.count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use strata_core::config::PipelineConfig;

    #[test]
    fn ticks_follow_the_configured_schedule() {
        let config = Config {
            pipeline: PipelineConfig {
                catalog_schedule: "cron(0 6 * * ? *)".into(),
                ..PipelineConfig::default()
            },
            format: OutputFormat::Text,
        };
        let after = Utc.with_ymd_and_hms(2026, 5, 1, 7, 0, 0).single().expect("time");
        let args = ScheduleArgs {
            count: 2,
            after: Some(after),
        };
        let ticks = upcoming(&args, &config).expect("ticks");
        assert_eq!(
            ticks,
            vec![
                Utc.with_ymd_and_hms(2026, 5, 2, 6, 0, 0).single().expect("time"),
                Utc.with_ymd_and_hms(2026, 5, 3, 6, 0, 0).single().expect("time"),
            ]
        );
    }

    #[test]
    fn invalid_timezone_is_reported() {
        let config = Config {
            pipeline: PipelineConfig {
                catalog_schedule_timezone: "Nowhere/Special".into(),
                ..PipelineConfig::default()
            },
            format: OutputFormat::Text,
        };
        let args = ScheduleArgs {
            count: 1,
            after: None,
        };
        assert!(upcoming(&args, &config).is_err());
    }
}
