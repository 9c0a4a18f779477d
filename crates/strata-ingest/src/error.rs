//! Error types for the ingest domain.

use std::time::Duration;

/// The result type used throughout strata-ingest.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while routing and transforming landed objects.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An object-created notification could not be understood.
    #[error("invalid event: {message}")]
    InvalidEvent {
        /// Description of what made the event invalid.
        message: String,
    },

    /// A suffix rule is malformed.
    #[error("invalid suffix rule: {message}")]
    InvalidRule {
        /// Description of the problem.
        message: String,
    },

    /// Two suffix rules could both match the same key.
    #[error("suffix rules overlap: '{first}' and '{second}'")]
    OverlappingRules {
        /// The earlier rule's suffix.
        first: String,
        /// The later rule's suffix.
        second: String,
    },

    /// The transformation reported a failure.
    #[error("transformation failed: {message}")]
    Transform {
        /// Description of the failure.
        message: String,
    },

    /// The transformation ran past its time budget.
    #[error("transformation timed out after {after:?}")]
    TimedOut {
        /// The budget that was exceeded.
        after: Duration,
    },

    /// The invocation task ended without reporting an outcome.
    #[error("invocation task aborted: {message}")]
    Aborted {
        /// Description of why the task ended.
        message: String,
    },

    /// An error from strata-core.
    #[error("core error: {0}")]
    Core(#[from] strata_core::Error),
}

impl Error {
    /// Creates a transformation failure.
    #[must_use]
    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform {
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
    fn access_denied_is_visible_through_core_variant() {
        let err = Error::from(strata_core::Error::AccessDenied {
            principal: "arn:identity::1:role/transform".into(),
            action: "storage:PutObject".into(),
            resource: "arn:storage:::raw/x".into(),
        });
        assert!(err.is_access_denied());
        assert!(err.to_string().contains("storage:PutObject"));
        assert!(!Error::transform("bad file").is_access_denied());
    }
}
