//! Error types for pipeline wiring.

/// The result type used throughout strata-pipeline.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while planning, provisioning or driving the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An event arrived for a bucket the pipeline does not own.
    #[error("event for unknown bucket {0}")]
    UnknownBucket(String),

    /// A resource key was declared twice in the plan.
    #[error("duplicate resource {0}")]
    DuplicateResource(String),

    /// A named identity has no canonical policy.
    #[error("unknown identity {0}")]
    UnknownIdentity(String),

    /// An error from the ingest front.
    #[error("ingest error: {0}")]
    Ingest(#[from] strata_ingest::Error),

    /// An error from the catalog.
    #[error("catalog error: {0}")]
    Catalog(#[from] strata_catalog::Error),

    /// An error from the query gateway.
    #[error("query error: {0}")]
    Query(#[from] strata_query::Error),

    /// An error from strata-core.
    #[error("core error: {0}")]
    Core(#[from] strata_core::Error),
}

impl Error {
    /// Returns true if the permission layer refused the request, at any
    /// depth.
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        match self {
            Self::Ingest(e) => e.is_access_denied(),
            Self::Catalog(e) => e.is_access_denied(),
            Self::Query(e) => e.is_access_denied(),
            Self::Core(e) => e.is_access_denied(),
            _ => false,
        }
    }
}
