//! Error types for the query domain.

use std::time::Duration;

use strata_core::id::QueryExecutionId;

use crate::execution::QueryState;

/// The result type used throughout strata-query.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the gateway and the access boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The SQL text is not a single read-only statement.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },

    /// The workgroup is disabled.
    #[error("workgroup {0} is disabled")]
    WorkgroupDisabled(String),

    /// The workgroup does not enforce its results configuration.
    #[error("workgroup {0} does not enforce its results configuration")]
    ConfigurationNotEnforced(String),

    /// The request named a results location other than the enforced one.
    #[error("results location {requested} conflicts with enforced location {enforced}")]
    ResultsLocationMismatch {
        /// Location in the request.
        requested: String,
        /// Location the workgroup enforces.
        enforced: String,
    },

    /// The query is not in a state that allows the operation.
    #[error("query {query_id} is {state}")]
    InvalidState {
        /// The query.
        query_id: QueryExecutionId,
        /// Its current state.
        state: QueryState,
    },

    /// The engine rejected or failed the query.
    #[error("query execution failed: {message}")]
    Execution {
        /// Engine error text.
        message: String,
    },

    /// The query ran past the gateway timeout.
    #[error("query timed out after {after:?}")]
    TimedOut {
        /// The exceeded timeout.
        after: Duration,
    },

    /// An error from the catalog.
    #[error("catalog error: {0}")]
    Catalog(#[from] strata_catalog::Error),

    /// An error from strata-core.
    #[error("core error: {0}")]
    Core(#[from] strata_core::Error),
}

impl Error {
    /// Creates an invalid-query error.
    #[must_use]
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates an execution error.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Returns true if the error is a permission-layer denial, wherever it
    /// was raised.
    #[must_use]
    pub const fn is_access_denied(&self) -> bool {
        match self {
            Self::Core(e) => e.is_access_denied(),
            Self::Catalog(e) => e.is_access_denied(),
            _ => false,
        }
    }

    /// Returns true if the error means "no such resource for this caller".
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        match self {
            Self::Core(e) => e.is_not_found(),
            Self::Catalog(strata_catalog::Error::Core(e)) => e.is_not_found(),
            _ => false,
        }
    }
}

impl From<datafusion::error::DataFusionError> for Error {
    fn from(err: datafusion::error::DataFusionError) -> Self {
        Self::execution(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denials_are_seen_through_catalog_errors() {
        let denied = strata_core::Error::AccessDenied {
            principal: "arn:identity::1:user/analyst".into(),
            action: "catalog:GetTables".into(),
            resource: "arn:catalog:r:1:database/db".into(),
        };
        assert!(Error::from(strata_catalog::Error::from(denied)).is_access_denied());
        assert!(!Error::invalid_query("x").is_access_denied());
    }

    #[test]
    fn not_found_covers_both_layers() {
        let missing = strata_core::Error::resource_not_found("query", "01H");
        assert!(Error::from(missing).is_not_found());
        assert!(!Error::execution("boom").is_not_found());
    }
}
