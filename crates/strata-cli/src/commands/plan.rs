//! Plan command - print the deployment's resources.

use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;
use strata_pipeline::DeploymentPlan;

use crate::{Config, OutputFormat};

/// Arguments for the plan command.
#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Include each resource's tags and properties.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Execute the plan command.
///
/// # Errors
///
/// Returns an error if the configuration does not produce a valid plan.
pub fn execute(args: &PlanArgs, config: &Config) -> Result<()> {
    let plan = DeploymentPlan::build(&config.pipeline)?;
    match config.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        OutputFormat::Text => print!("{}", render_text(&plan, args.verbose)),
    }
    Ok(())
}

fn render_text(plan: &DeploymentPlan, verbose: bool) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Stage {} ({} resources)",
        plan.context().stage.bold(),
        plan.resources().len()
    );
    let _ = writeln!(out);
    for (i, resource) in plan.resources().iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>3}. {:<22} {}",
            i + 1,
            resource.kind.label(),
            resource.name.bold()
        );
        if !resource.depends_on.is_empty() {
            let _ = writeln!(
                out,
                "     {}",
                format!("after {}", resource.depends_on.join(", ")).dimmed()
            );
        }
        if verbose {
            for (key, value) in resource.properties.iter().chain(&resource.tags) {
                let _ = writeln!(out, "     {key} = {value}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::config::PipelineConfig;

    #[test]
    fn text_lists_resources_in_creation_order() {
        let plan = DeploymentPlan::build(&PipelineConfig::default()).expect("plan");
        let text = render_text(&plan, false);
        let landing = text.find("strata-dev-raw-data").expect("landing bucket");
        let job = text
            .find("strata-dev-create-catalog-from-output")
            .expect("catalog job");
        assert!(landing < job);
        assert!(!text.contains("maxConcurrentRuns"));
    }

    #[test]
    fn verbose_text_includes_properties() {
        let plan = DeploymentPlan::build(&PipelineConfig::default()).expect("plan");
        assert!(render_text(&plan, true).contains("maxConcurrentRuns = 1"));
    }
}
