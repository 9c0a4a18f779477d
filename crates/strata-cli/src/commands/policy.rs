//! Policy command - print an identity's policy document.

use anyhow::{Context as _, Result};
use clap::Args;
use strata_core::naming::{Context, ZoneNames};
use strata_core::policy::PolicyDocument;
use strata_pipeline::policies::policy_for;

use crate::Config;

/// Identities the policy command knows about.
pub const IDENTITIES: [&str; 4] = ["transform", "notifier", "catalog", "access"];

/// Arguments for the policy command.
#[derive(Debug, Args)]
pub struct PolicyArgs {
    /// Identity key: transform, notifier, catalog or access.
    #[arg()]
    pub identity: String,
}

/// Execute the policy command. Documents are always printed as JSON.
///
/// # Errors
///
/// Returns an error for an unknown identity key.
pub fn execute(args: &PolicyArgs, config: &Config) -> Result<()> {
    let document = lookup(config, &args.identity)?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn lookup(config: &Config, identity: &str) -> Result<PolicyDocument> {
    let ctx = Context::from(&config.pipeline);
    let zones = ZoneNames::for_context(&ctx);
    policy_for(&ctx, &zones, identity).with_context(|| {
        format!(
            "unknown identity '{identity}'; expected one of {}",
            IDENTITIES.join(", ")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OutputFormat;
    use strata_core::config::PipelineConfig;

    fn config() -> Config {
        Config {
            pipeline: PipelineConfig::default(),
            format: OutputFormat::Json,
        }
    }

    #[test]
    fn known_identities_resolve() {
        for identity in IDENTITIES {
            assert!(lookup(&config(), identity).is_ok(), "{identity}");
        }
    }

    #[test]
    fn unknown_identity_names_the_choices() {
        let err = lookup(&config(), "admin").expect_err("unknown");
        assert!(err.to_string().contains("transform, notifier, catalog, access"));
    }
}
