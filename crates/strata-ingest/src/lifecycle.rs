//! Landing zone lifecycle expiry.
//!
//! The landing zone owns a fixed retention window. Expiry is a cleanup
//! control: nothing downstream depends on when, or whether, a landed object
//! is removed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use strata_core::storage::StorageBackend;

use crate::error::{Error, Result};
use crate::metrics::IngestMetrics;

/// An expiration rule over a key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRule {
    /// Rule identifier.
    pub id: String,
    /// Only keys under this prefix expire; empty covers the whole zone.
    #[serde(default)]
    pub prefix: String,
    /// Days after creation when an object expires.
    pub expiration_days: u32,
}

impl LifecycleRule {
    /// A rule expiring every object after `days`.
    #[must_use]
    pub fn expire_after_days(id: impl Into<String>, days: u32) -> Self {
        Self {
            id: id.into(),
            prefix: String::new(),
            expiration_days: days,
        }
    }

    /// Returns true if an object created at `created` has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, created: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        created + Duration::days(i64::from(self.expiration_days)) <= now
    }
}

/// Applies one lifecycle rule to one zone.
#[derive(Clone)]
pub struct LifecycleSweeper {
    storage: Arc<dyn StorageBackend>,
    bucket: String,
    rule: LifecycleRule,
    metrics: IngestMetrics,
}

impl std::fmt::Debug for LifecycleSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleSweeper")
            .field("bucket", &self.bucket)
            .field("rule", &self.rule)
            .finish_non_exhaustive()
    }
}

impl LifecycleSweeper {
    /// Creates a sweeper.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRule`] for a zero-day rule.
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        bucket: impl Into<String>,
        rule: LifecycleRule,
    ) -> Result<Self> {
        if rule.expiration_days == 0 {
            return Err(Error::InvalidRule {
                message: format!("lifecycle rule '{}' must expire after at least one day", rule.id),
            });
        }
        Ok(Self {
            storage,
            bucket: bucket.into(),
            rule,
            metrics: IngestMetrics::new(),
        })
    }

    /// The rule being applied.
    #[must_use]
    pub fn rule(&self) -> &LifecycleRule {
        &self.rule
    }

    /// Deletes every expired object, returning the deleted keys in order.
    ///
    /// Objects without a modification time are kept.
    ///
    /// # Errors
    ///
    /// Returns the first storage error; objects deleted before it stay
    /// deleted.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut listed = self.storage.list(&self.rule.prefix).await?;
        listed.sort_by(|a, b| a.path.cmp(&b.path));

        let mut deleted = Vec::new();
        for meta in listed {
            let Some(created) = meta.last_modified else {
                continue;
            };
            if self.rule.is_expired(created, now) {
                self.storage.delete(&meta.path).await?;
                deleted.push(meta.path);
            }
        }

        if !deleted.is_empty() {
            tracing::info!(
                bucket = %self.bucket,
                rule = %self.rule.id,
                expired = deleted.len(),
                "lifecycle rule expired landing objects"
            );
            self.metrics.record_expired(&self.rule.id, deleted.len());
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use strata_core::storage::{MemoryBackend, WritePrecondition};

    #[tokio::test]
    async fn only_objects_past_retention_are_deleted() {
        let storage = Arc::new(MemoryBackend::new());
        for key in ["old.MF4", "fresh.MF4", "borderline.MF4"] {
            storage
                .put(key, Bytes::from_static(b"x"), WritePrecondition::None)
                .await
                .expect("put");
        }
        let now = Utc::now();
        storage
            .set_last_modified("old.MF4", now - Duration::days(31))
            .expect("age");
        storage
            .set_last_modified("borderline.MF4", now - Duration::days(30))
            .expect("age");

        let sweeper = LifecycleSweeper::new(
            storage.clone(),
            "raw",
            LifecycleRule::expire_after_days("expire-raw", 30),
        )
        .expect("rule");
        let deleted = sweeper.sweep(now).await.expect("sweep");

        assert_eq!(deleted, vec!["borderline.MF4", "old.MF4"]);
        assert_eq!(storage.len(), 1);
        assert!(sweeper.sweep(now).await.expect("sweep").is_empty());
    }

    #[test]
    fn zero_day_rules_are_rejected() {
        let err = LifecycleSweeper::new(
            Arc::new(MemoryBackend::new()),
            "raw",
            LifecycleRule::expire_after_days("bad", 0),
        )
        .expect_err("invalid");
        assert!(matches!(err, Error::InvalidRule { .. }));
    }
}
