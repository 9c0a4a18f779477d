//! Workgroups: named query configurations with an enforced results location.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where query results are written: a bucket and a key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsLocation {
    /// Results bucket.
    pub bucket: String,
    /// Key prefix inside the bucket; empty or ending in `/`.
    pub prefix: String,
}

impl ResultsLocation {
    /// Location at the root of a bucket.
    #[must_use]
    pub fn bucket_root(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
        }
    }

    /// Parses `s3://bucket/` or `s3://bucket/prefix/`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if the URI has no scheme or bucket.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("s3://")
            .ok_or_else(|| Error::invalid_query(format!("results location {uri} is not an s3:// URI")))?;
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(Error::invalid_query(format!(
                "results location {uri} has no bucket"
            )));
        }
        let prefix = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };
        Ok(Self {
            bucket: bucket.to_string(),
            prefix,
        })
    }

    /// Key prefix of one consumer's results area.
    #[must_use]
    pub fn consumer_prefix(&self, consumer: &str) -> String {
        format!("{}{consumer}/", self.prefix)
    }
}

impl fmt::Display for ResultsLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.prefix)
    }
}

/// Whether a workgroup accepts queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkgroupState {
    /// Queries are accepted.
    Enabled,
    /// Queries are rejected.
    Disabled,
}

/// A named query-execution configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workgroup {
    /// Workgroup name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Enabled or disabled.
    pub state: WorkgroupState,
    /// The single location results are written to.
    pub results: ResultsLocation,
    /// Whether the results location overrides client settings.
    pub enforce_configuration: bool,
}

impl Workgroup {
    /// An enabled, enforcing workgroup.
    #[must_use]
    pub fn new(name: impl Into<String>, results: ResultsLocation) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            state: WorkgroupState::Enabled,
            results,
            enforce_configuration: true,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Returns true if the workgroup accepts queries.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state == WorkgroupState::Enabled
    }

    /// Checks a submission against this workgroup's configuration.
    ///
    /// A request may omit the results location or repeat the enforced one;
    /// anything else is rejected rather than redirected.
    ///
    /// # Errors
    ///
    /// `WorkgroupDisabled`, `ConfigurationNotEnforced` or
    /// `ResultsLocationMismatch`.
    pub fn admit(&self, requested: Option<&str>) -> Result<()> {
        if !self.is_enabled() {
            return Err(Error::WorkgroupDisabled(self.name.clone()));
        }
        if !self.enforce_configuration {
            return Err(Error::ConfigurationNotEnforced(self.name.clone()));
        }
        if let Some(uri) = requested {
            if ResultsLocation::parse(uri).ok().as_ref() != Some(&self.results) {
                return Err(Error::ResultsLocationMismatch {
                    requested: uri.to_string(),
                    enforced: self.results.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workgroup() -> Workgroup {
        Workgroup::new("wg", ResultsLocation::bucket_root("results"))
    }

    #[test]
    fn parses_and_prints_locations() {
        let loc = ResultsLocation::parse("s3://results/athena").expect("parse");
        assert_eq!(loc.prefix, "athena/");
        assert_eq!(loc.to_string(), "s3://results/athena/");
        assert_eq!(
            ResultsLocation::parse("s3://results").expect("parse"),
            ResultsLocation::bucket_root("results")
        );
        assert!(ResultsLocation::parse("results/").is_err());
        assert!(ResultsLocation::parse("s3:///x").is_err());
    }

    #[test]
    fn admits_only_the_enforced_location() {
        let wg = workgroup();
        wg.admit(None).expect("default location");
        wg.admit(Some("s3://results/")).expect("same location");
        assert!(matches!(
            wg.admit(Some("s3://elsewhere/")),
            Err(Error::ResultsLocationMismatch { .. })
        ));
    }

    #[test]
    fn disabled_or_unenforced_workgroups_reject() {
        let mut wg = workgroup();
        wg.enforce_configuration = false;
        assert!(matches!(wg.admit(None), Err(Error::ConfigurationNotEnforced(_))));
        wg.state = WorkgroupState::Disabled;
        assert!(matches!(wg.admit(None), Err(Error::WorkgroupDisabled(_))));
    }

    #[test]
    fn consumer_areas_are_disjoint() {
        let loc = ResultsLocation::bucket_root("results");
        assert_eq!(loc.consumer_prefix("alice"), "alice/");
        assert!(!loc.consumer_prefix("alice2").starts_with(&loc.consumer_prefix("alice")));
    }
}
