//! Pipeline configuration.
//!
//! Values come from `STRATA_*` environment variables with defaults that
//! match a single-region deployment. [`PipelineConfig::from_env_with`] takes
//! a lookup function so tests never touch the process environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Suffixes accepted by the trigger filter when none are configured.
pub const DEFAULT_ACCEPTED_SUFFIXES: [&str; 4] = [".MF4", ".MFC", ".MFE", ".MFM"];

/// Default catalog builder timeout (48 hours).
pub const DEFAULT_CATALOG_TIMEOUT: Duration = Duration::from_secs(48 * 60 * 60);

/// Default catalog builder schedule: daily at 12:00.
pub const DEFAULT_CATALOG_SCHEDULE: &str = "cron(0 12 * * ? *)";

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Prefix of every global resource name.
    pub app_prefix: String,
    /// Prefix of the base tag keys.
    pub tag_prefix: String,
    /// Deployment stage (e.g. `dev`, `staging`, `prod`).
    pub stage: String,
    /// Deployment region.
    pub region: String,
    /// Owning account identifier.
    pub account: String,
    /// Whether the region is part of resource names.
    pub multi_region: bool,
    /// Object key suffixes that trigger a transform (case-sensitive).
    pub accepted_suffixes: Vec<String>,
    /// Days before landing objects expire; 0 disables expiry.
    pub landing_retention_days: u32,
    /// Upper bound on one catalog builder run.
    #[serde(with = "duration_secs")]
    pub catalog_timeout: Duration,
    /// Catalog builder schedule expression.
    pub catalog_schedule: String,
    /// IANA timezone the schedule is evaluated in.
    pub catalog_schedule_timezone: String,
    /// Whether the scheduled trigger starts armed.
    pub catalog_schedule_armed: bool,
    /// Prefix of catalog table names.
    pub catalog_table_prefix: String,
    /// Concurrent queries per workgroup.
    pub query_concurrency: usize,
    /// Upper bound on one query.
    #[serde(with = "duration_secs")]
    pub query_timeout: Duration,
    /// Rows returned per query at most.
    pub max_query_rows: usize,
    /// Finished query executions the gateway remembers.
    #[serde(default = "default_query_history_limit")]
    pub query_history_limit: usize,
}

const fn default_query_history_limit() -> usize {
    1_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            app_prefix: "strata".to_string(),
            tag_prefix: "strata".to_string(),
            stage: "dev".to_string(),
            region: "eu-west-1".to_string(),
            account: "000000000000".to_string(),
            multi_region: false,
            accepted_suffixes: DEFAULT_ACCEPTED_SUFFIXES
                .iter()
                .map(ToString::to_string)
                .collect(),
            landing_retention_days: 30,
            catalog_timeout: DEFAULT_CATALOG_TIMEOUT,
            catalog_schedule: DEFAULT_CATALOG_SCHEDULE.to_string(),
            catalog_schedule_timezone: "UTC".to_string(),
            catalog_schedule_armed: false,
            catalog_table_prefix: "tbl_".to_string(),
            query_concurrency: 8,
            query_timeout: Duration::from_secs(600),
            max_query_rows: 10_000,
            query_history_limit: default_query_history_limit(),
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from the process environment.
    ///
    /// `STRATA_STAGE` is required; everything else falls back to defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a variable is malformed or the
    /// result fails validation.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary lookup function.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a value is malformed or the result
    /// fails validation.
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key).and_then(|v| {
                let trimmed = v.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
        };

        let mut config = Self::default();

        config.stage =
            get("STRATA_STAGE").ok_or_else(|| Error::configuration("STRATA_STAGE is required"))?;
        if let Some(v) = get("STRATA_APP_PREFIX") {
            config.app_prefix = v;
        }
        if let Some(v) = get("STRATA_TAG_PREFIX") {
            config.tag_prefix = v;
        }
        if let Some(v) = get("STRATA_REGION") {
            config.region = v;
        }
        if let Some(v) = get("STRATA_ACCOUNT") {
            config.account = v;
        }
        if let Some(v) = get("STRATA_MULTI_REGION") {
            config.multi_region = parse_bool("STRATA_MULTI_REGION", &v)?;
        }
        if let Some(v) = get("STRATA_ACCEPTED_SUFFIXES") {
            config.accepted_suffixes = parse_list(&v);
        }
        if let Some(v) = get("STRATA_LANDING_RETENTION_DAYS") {
            config.landing_retention_days = parse_num("STRATA_LANDING_RETENTION_DAYS", &v)?;
        }
        if let Some(v) = get("STRATA_CATALOG_TIMEOUT_SECS") {
            config.catalog_timeout =
                Duration::from_secs(parse_num("STRATA_CATALOG_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("STRATA_CATALOG_SCHEDULE") {
            config.catalog_schedule = v;
        }
        if let Some(v) = get("STRATA_CATALOG_SCHEDULE_TIMEZONE") {
            config.catalog_schedule_timezone = v;
        }
        if let Some(v) = get("STRATA_CATALOG_SCHEDULE_ARMED") {
            config.catalog_schedule_armed = parse_bool("STRATA_CATALOG_SCHEDULE_ARMED", &v)?;
        }
        if let Some(v) = get("STRATA_CATALOG_TABLE_PREFIX") {
            config.catalog_table_prefix = v;
        }
        if let Some(v) = get("STRATA_QUERY_CONCURRENCY") {
            config.query_concurrency = parse_num("STRATA_QUERY_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("STRATA_QUERY_TIMEOUT_SECS") {
            config.query_timeout = Duration::from_secs(parse_num("STRATA_QUERY_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("STRATA_MAX_QUERY_ROWS") {
            config.max_query_rows = parse_num("STRATA_MAX_QUERY_ROWS", &v)?;
        }
        if let Some(v) = get("STRATA_QUERY_HISTORY_LIMIT") {
            config.query_history_limit = parse_num("STRATA_QUERY_HISTORY_LIMIT", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that every consumer relies on.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending setting.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("app_prefix", &self.app_prefix),
            ("stage", &self.stage),
            ("region", &self.region),
        ] {
            if !is_name_segment(value) {
                return Err(Error::configuration(format!(
                    "{key} must be lowercase alphanumeric with dashes (got {value:?})"
                )));
            }
        }
        if self.accepted_suffixes.is_empty() {
            return Err(Error::configuration(
                "accepted_suffixes must list at least one suffix",
            ));
        }
        if let Some(bad) = self
            .accepted_suffixes
            .iter()
            .find(|s| !s.starts_with('.') || s.len() < 2)
        {
            return Err(Error::configuration(format!(
                "accepted suffix must start with '.' (got {bad:?})"
            )));
        }
        if self.catalog_timeout.is_zero() {
            return Err(Error::configuration("catalog_timeout must be positive"));
        }
        if self.query_timeout.is_zero() {
            return Err(Error::configuration("query_timeout must be positive"));
        }
        if self.query_concurrency == 0 {
            return Err(Error::configuration("query_concurrency must be positive"));
        }
        if self.max_query_rows == 0 {
            return Err(Error::configuration("max_query_rows must be positive"));
        }
        if self.query_history_limit == 0 {
            return Err(Error::configuration("query_history_limit must be positive"));
        }
        Ok(())
    }
}

fn is_name_segment(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::configuration(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn parse_num<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| Error::configuration(format!("{name} must be a number: {e}")))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
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
