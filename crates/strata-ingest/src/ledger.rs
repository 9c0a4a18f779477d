//! Durable invocation ledger.
//!
//! One JSON record per delivery, keyed by a hash of `bucket/key#event_id`.
//! The record is reserved with a `DoesNotExist` write before the transform
//! runs, so a re-delivered event finds the existing record and is dropped.
//! The outcome is written back with a version-matched update.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use strata_core::id::InvocationId;
use strata_core::storage::{read_json, write_json, StorageBackend, WritePrecondition, WriteResult};

use crate::error::{Error, Result};
use crate::event::ObjectCreatedEvent;

/// Default key prefix for ledger records.
pub const DEFAULT_LEDGER_PREFIX: &str = "invocations/";

/// Lifecycle state of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InvocationStatus {
    /// Reserved and handed to the transformation.
    Pending,
    /// The transformation completed.
    Succeeded {
        /// Output zone keys written.
        outputs: Vec<String>,
    },
    /// The transformation failed; the source object stays unprocessed.
    Failed {
        /// Error reported by the transformation.
        reason: String,
    },
}

impl InvocationStatus {
    /// Returns true once the invocation has an outcome.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Ledger record for one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRecord {
    /// Invocation identifier.
    pub invocation_id: InvocationId,
    /// Source bucket.
    pub bucket: String,
    /// Source object key.
    pub key: String,
    /// Source object size in bytes, as announced by the event.
    #[serde(default)]
    pub size: u64,
    /// Delivery event id.
    pub event_id: String,
    /// Suffix rule that matched.
    pub rule: String,
    /// ARN of the execution identity the transform ran under.
    pub identity: String,
    /// When the invocation was reserved.
    pub invoked_at: DateTime<Utc>,
    /// When the outcome was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Current status.
    pub status: InvocationStatus,
}

/// Result of reserving an invocation.
#[derive(Debug, Clone)]
pub enum Reservation {
    /// First delivery: the caller owns the invocation.
    New {
        /// The reserved record.
        record: InvocationRecord,
        /// Version to update the outcome against.
        version: String,
    },
    /// The delivery was seen before.
    Duplicate(InvocationRecord),
}

/// Storage-backed invocation ledger.
#[derive(Clone)]
pub struct InvocationLedger {
    storage: Arc<dyn StorageBackend>,
    prefix: String,
}

impl std::fmt::Debug for InvocationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationLedger")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl InvocationLedger {
    /// Creates a ledger under [`DEFAULT_LEDGER_PREFIX`].
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self::with_prefix(storage, DEFAULT_LEDGER_PREFIX)
    }

    /// Creates a ledger under a custom prefix.
    #[must_use]
    pub fn with_prefix(storage: Arc<dyn StorageBackend>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
        }
    }

    /// Ledger key for a delivery.
    #[must_use]
    pub fn record_key(&self, event: &ObjectCreatedEvent) -> String {
        let digest = Sha256::digest(
            format!("{}/{}#{}", event.bucket, event.key, event.event_id).as_bytes(),
        );
        let hash = hex::encode(digest);
        format!("{}{}.json", self.prefix, &hash[..40])
    }

    /// Reserves the invocation for a delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read or written.
    pub async fn reserve(
        &self,
        event: &ObjectCreatedEvent,
        rule: &str,
        identity: &str,
    ) -> Result<Reservation> {
        let key = self.record_key(event);
        let record = InvocationRecord {
            invocation_id: InvocationId::generate(),
            bucket: event.bucket.clone(),
            key: event.key.clone(),
            size: event.size,
            event_id: event.event_id.clone(),
            rule: rule.to_string(),
            identity: identity.to_string(),
            invoked_at: Utc::now(),
            completed_at: None,
            status: InvocationStatus::Pending,
        };

        match write_json(
            self.storage.as_ref(),
            &key,
            &record,
            WritePrecondition::DoesNotExist,
        )
        .await?
        {
            WriteResult::Success { version } => Ok(Reservation::New { record, version }),
            WriteResult::PreconditionFailed { .. } => {
                let (existing, _) = read_json::<InvocationRecord, _>(self.storage.as_ref(), &key)
                    .await?
                    .ok_or_else(|| {
                        Error::Core(strata_core::Error::internal(format!(
                            "ledger record vanished after conflict: {key}"
                        )))
                    })?;
                Ok(Reservation::Duplicate(existing))
            }
        }
    }

    /// Records the outcome of a reserved invocation.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionFailed` if the record changed since it was
    /// reserved, or a storage error.
    pub async fn complete(
        &self,
        mut record: InvocationRecord,
        version: &str,
        status: InvocationStatus,
    ) -> Result<InvocationRecord> {
        let key = self.key_for(&record);
        record.status = status;
        record.completed_at = Some(Utc::now());

        match write_json(
            self.storage.as_ref(),
            &key,
            &record,
            WritePrecondition::MatchesVersion(version.to_string()),
        )
        .await?
        {
            WriteResult::Success { .. } => Ok(record),
            WriteResult::PreconditionFailed { current_version } => {
                Err(Error::Core(strata_core::Error::PreconditionFailed {
                    message: format!(
                        "ledger record {key} changed (expected version {version}, found {current_version})"
                    ),
                }))
            }
        }
    }

    /// Reads the record of a delivery, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    pub async fn get(&self, event: &ObjectCreatedEvent) -> Result<Option<InvocationRecord>> {
        Ok(
            read_json::<InvocationRecord, _>(self.storage.as_ref(), &self.record_key(event))
                .await?
                .map(|(record, _)| record),
        )
    }

    /// Lists every record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    pub async fn list(&self) -> Result<Vec<InvocationRecord>> {
        let mut records = Vec::new();
        for meta in self.storage.list(&self.prefix).await? {
            if let Some((record, _)) =
                read_json::<InvocationRecord, _>(self.storage.as_ref(), &meta.path).await?
            {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.invocation_id.cmp(&b.invocation_id));
        Ok(records)
    }

    fn key_for(&self, record: &InvocationRecord) -> String {
        self.record_key(&ObjectCreatedEvent {
            event_id: record.event_id.clone(),
            bucket: record.bucket.clone(),
            key: record.key.clone(),
            size: 0,
            event_time: record.invoked_at,
        })
    }
}
