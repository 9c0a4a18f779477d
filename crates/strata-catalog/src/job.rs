//! Catalog job definition and trigger bindings.
//!
//! One job, many triggers: an on-demand binding and any number of scheduled
//! bindings all start the same job. The job caps concurrent runs at one.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schedule::ScheduleEvaluator;

/// Maximum concurrent runs of a catalog job.
pub const MAX_CONCURRENT_RUNS: u32 = 1;

/// How a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Started by an operator.
    Manual,
    /// Started by a schedule tick.
    Scheduled,
}

impl TriggerKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What fires a trigger binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Fires when asked.
    OnDemand,
    /// Fires on schedule ticks.
    Scheduled {
        /// Schedule expression.
        expression: String,
        /// IANA timezone the expression is evaluated in.
        timezone: String,
    },
}

/// A named trigger attached to the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerBinding {
    /// Binding name, unique within the job.
    pub name: String,
    /// What fires it.
    pub spec: TriggerSpec,
    /// Whether a scheduled binding starts armed. On-demand bindings are
    /// always live.
    pub armed: bool,
}

impl TriggerBinding {
    /// An on-demand binding.
    #[must_use]
    pub fn on_demand(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spec: TriggerSpec::OnDemand,
            armed: true,
        }
    }

    /// A scheduled binding.
    #[must_use]
    pub fn scheduled(
        name: impl Into<String>,
        expression: impl Into<String>,
        timezone: impl Into<String>,
        armed: bool,
    ) -> Self {
        Self {
            name: name.into(),
            spec: TriggerSpec::Scheduled {
                expression: expression.into(),
                timezone: timezone.into(),
            },
            armed,
        }
    }

    /// Run kind this binding starts.
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        match self.spec {
            TriggerSpec::OnDemand => TriggerKind::Manual,
            TriggerSpec::Scheduled { .. } => TriggerKind::Scheduled,
        }
    }

    /// Evaluator for a scheduled binding, `None` for on-demand ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression or timezone is invalid.
    pub fn evaluator(&self) -> Result<Option<ScheduleEvaluator>> {
        match &self.spec {
            TriggerSpec::OnDemand => Ok(None),
            TriggerSpec::Scheduled {
                expression,
                timezone,
            } => ScheduleEvaluator::new(expression, timezone).map(Some),
        }
    }
}

/// The catalog builder job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogJobDefinition {
    /// Job name.
    pub name: String,
    /// Database the job publishes.
    pub database: String,
    /// Execution identity ARN.
    pub role_arn: String,
    /// Upper bound on one run.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Concurrent runs allowed; must be [`MAX_CONCURRENT_RUNS`].
    pub max_concurrent_runs: u32,
    /// Automatic retries of a failed run; must be zero.
    pub max_retries: u32,
    /// Triggers starting this job.
    pub triggers: Vec<TriggerBinding>,
}

impl CatalogJobDefinition {
    /// Creates a job with no triggers.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        database: impl Into<String>,
        role_arn: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            database: database.into(),
            role_arn: role_arn.into(),
            timeout,
            max_concurrent_runs: MAX_CONCURRENT_RUNS,
            max_retries: 0,
            triggers: Vec::new(),
        }
    }

    /// Adds a trigger binding.
    #[must_use]
    pub fn with_trigger(mut self, binding: TriggerBinding) -> Self {
        self.triggers.push(binding);
        self
    }

    /// Looks up a binding by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTrigger`] if there is none.
    pub fn trigger(&self, name: &str) -> Result<&TriggerBinding> {
        self.triggers
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::UnknownTrigger(name.to_string()))
    }

    /// Checks the job's invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJob`] for a zero timeout, concurrency other
    /// than one, retries, duplicate binding names, or an invalid schedule.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::invalid_job("timeout must be positive"));
        }
        if self.max_concurrent_runs != MAX_CONCURRENT_RUNS {
            return Err(Error::invalid_job(format!(
                "max_concurrent_runs must be {MAX_CONCURRENT_RUNS}, got {}",
                self.max_concurrent_runs
            )));
        }
        if self.max_retries != 0 {
            return Err(Error::invalid_job("failed runs are not retried"));
        }
        for (i, binding) in self.triggers.iter().enumerate() {
            if self.triggers[..i].iter().any(|t| t.name == binding.name) {
                return Err(Error::invalid_job(format!(
                    "duplicate trigger binding '{}'",
                    binding.name
                )));
            }
            binding.evaluator()?;
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> CatalogJobDefinition {
        CatalogJobDefinition::new("job", "db", "arn:identity::1:role/catalog", Duration::from_secs(60))
            .with_trigger(TriggerBinding::on_demand("manual"))
            .with_trigger(TriggerBinding::scheduled("daily", "cron(0 12 * * ? *)", "UTC", false))
    }

    #[test]
    fn one_job_carries_several_bindings() {
        let job = job();
        job.validate().expect("valid");
        assert_eq!(job.trigger("manual").expect("manual").kind(), TriggerKind::Manual);
        assert_eq!(job.trigger("daily").expect("daily").kind(), TriggerKind::Scheduled);
        assert!(matches!(job.trigger("nope"), Err(Error::UnknownTrigger(_))));
    }

    #[test]
    fn invariants_are_enforced() {
        let mut concurrent = job();
        concurrent.max_concurrent_runs = 2;
        assert!(concurrent.validate().is_err());

        let mut retried = job();
        retried.max_retries = 1;
        assert!(retried.validate().is_err());

        let duplicate = job().with_trigger(TriggerBinding::on_demand("manual"));
        assert!(duplicate.validate().is_err());

        let bad_cron = job().with_trigger(TriggerBinding::scheduled("x", "cron(1)", "UTC", true));
        assert!(matches!(bad_cron.validate(), Err(Error::InvalidSchedule { .. })));
    }

    #[test]
    fn definition_serializes_with_tagged_triggers() {
        let json = serde_json::to_value(job()).expect("encode");
        assert_eq!(json["timeout"], 60);
        assert_eq!(json["triggers"][1]["spec"]["type"], "scheduled");
        assert_eq!(json["maxConcurrentRuns"], 1);
    }
}
