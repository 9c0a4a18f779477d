//! Error types and result aliases for Strata.
//!
//! Every crate in the workspace wraps this error in its own enum. The
//! permission layer is the only producer of [`Error::AccessDenied`]; callers
//! propagate it unchanged so the consumer sees the original denial.

use std::fmt;

/// The result type used throughout Strata.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors shared by every Strata component.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier failed to parse.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Why parsing failed.
        message: String,
    },

    /// A zone call failed for a reason other than a missing object.
    #[error("storage error: {message}")]
    Storage {
        /// What failed.
        message: String,
    },

    /// A stored document or payload did not encode or decode.
    #[error("serialization error: {message}")]
    Serialization {
        /// Decoder or encoder message.
        message: String,
    },

    /// A named resource (table, workgroup, query, run) does not exist.
    #[error("not found: {resource_type} with id {id}")]
    ResourceNotFound {
        /// Resource kind.
        resource_type: &'static str,
        /// Name or id looked up.
        id: String,
    },

    /// An object key does not exist in a zone.
    #[error("not found: {0}")]
    NotFound(String),

    /// A request was malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A compare-and-swap lost to a concurrent writer.
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        /// Which write lost.
        message: String,
    },

    /// The permission layer rejected the request.
    #[error("access denied: {principal} is not authorized to perform {action} on {resource}")]
    AccessDenied {
        /// Identity that issued the request.
        principal: String,
        /// Action that was attempted (`service:Name`).
        action: String,
        /// Resource the action targeted.
        resource: String,
    },

    /// A setting is missing or malformed.
    #[error("configuration error: {message}")]
    Configuration {
        /// Names the offending setting.
        message: String,
    },

    /// A broken invariant, such as a poisoned lock.
    #[error("internal error: {message}")]
    Internal {
        /// What broke.
        message: String,
    },
}

impl Error {
    /// A storage error without a backend cause.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// A missing named resource.
    #[must_use]
    pub fn resource_not_found(resource_type: &'static str, id: impl fmt::Display) -> Self {
        Self::ResourceNotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// A configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// A serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// An internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error was produced by the permission layer.
    #[must_use]
    pub const fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }

    /// Returns true for missing objects and missing named resources.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::ResourceNotFound { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
