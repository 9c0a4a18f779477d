//! Error types for the catalog domain.

/// The result type used throughout strata-catalog.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while cataloging the output zone.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A parquet file could not be read for schema sampling.
    #[error("schema sampling failed for {key}: {message}")]
    Schema {
        /// Key of the sampled file.
        key: String,
        /// Description of the failure.
        message: String,
    },

    /// A schedule expression could not be parsed.
    #[error("invalid schedule expression '{expression}': {message}")]
    InvalidSchedule {
        /// The expression as configured.
        expression: String,
        /// Description of the problem.
        message: String,
    },

    /// The schedule timezone is not a known IANA zone.
    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),

    /// A job definition violates its constraints.
    #[error("invalid job definition: {message}")]
    InvalidJob {
        /// Description of the problem.
        message: String,
    },

    /// No trigger binding with the given name exists on the job.
    #[error("unknown trigger binding: {0}")]
    UnknownTrigger(String),

    /// The run did not finish within the job timeout.
    #[error("catalog run timed out after {after:?}")]
    TimedOut {
        /// The timeout that was exceeded.
        after: std::time::Duration,
    },

    /// An error from strata-core.
    #[error("core error: {0}")]
    Core(#[from] strata_core::Error),
}

impl Error {
    /// Creates a job definition error.
    #[must_use]
    pub fn invalid_job(message: impl Into<String>) -> Self {
        Self::InvalidJob {
            message: message.into(),
        }
    }

    /// Returns true if the error is a permission-layer denial.
    #[must_use]
    pub const fn is_access_denied(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_access_denied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_expression() {
        let err = Error::InvalidSchedule {
            expression: "cron(bad)".into(),
            message: "expected 6 fields".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid schedule expression 'cron(bad)': expected 6 fields"
        );
    }

    #[test]
    fn core_denials_stay_recognizable() {
        let err = Error::from(strata_core::Error::AccessDenied {
            principal: "arn:identity::1:role/catalog".into(),
            action: "catalog:UpdateTable".into(),
            resource: "arn:catalog:r:1:table/db/t".into(),
        });
        assert!(err.is_access_denied());
        assert!(!Error::invalid_job("bad").is_access_denied());
    }
}
