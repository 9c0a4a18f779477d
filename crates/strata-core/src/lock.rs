//! Distributed lock backed by object storage.
//!
//! The catalog builder's "at most one concurrent run" rule is enforced with
//! this lock:
//! - **CAS**: acquisition writes the lock file with a `DoesNotExist`
//!   precondition, so only one writer wins
//! - **TTL**: an abandoned lock expires and can be taken over
//! - **Fencing**: every acquisition increments a sequence number
//!
//! Acquisition is single-shot. A caller that loses the race is told who
//! holds the lock and decides what to do; the catalog runner drops the
//! trigger instead of queueing it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::storage::{StorageBackend, WritePrecondition, WriteResult};

/// Lock file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    /// Unique lock holder ID.
    pub holder_id: String,

    /// When the lock expires.
    pub expires_at: DateTime<Utc>,

    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,

    /// Monotonically increasing sequence number for fencing.
    #[serde(default)]
    pub sequence_number: u64,

    /// Optional description of the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl LockInfo {
    fn new(holder_id: &str, ttl: Duration, sequence_number: u64, operation: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            holder_id: holder_id.to_string(),
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            acquired_at: now,
            sequence_number,
            operation,
        }
    }

    /// Returns whether this lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Result of a single acquisition attempt.
#[derive(Debug)]
pub enum Acquisition {
    /// The lock is now held.
    Acquired(LockGuard),
    /// Another holder has the lock.
    Held(LockInfo),
}

/// A distributed lock backed by object storage.
#[derive(Clone)]
pub struct DistributedLock {
    storage: Arc<dyn StorageBackend>,
    lock_path: String,
    holder_id: String,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("lock_path", &self.lock_path)
            .field("holder_id", &self.holder_id)
            .finish_non_exhaustive()
    }
}

impl DistributedLock {
    /// Creates a lock handle with a fresh holder ID.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, lock_path: impl Into<String>) -> Self {
        Self {
            storage,
            lock_path: lock_path.into(),
            holder_id: Ulid::new().to_string(),
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.lock_path
    }

    /// Attempts to acquire the lock once.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures; contention is reported
    /// as [`Acquisition::Held`].
    pub async fn try_acquire(
        &self,
        ttl: Duration,
        operation: Option<String>,
    ) -> Result<Acquisition> {
        let info = LockInfo::new(&self.holder_id, ttl, 1, operation.clone());
        if let WriteResult::Success { version } = self
            .storage
            .put(&self.lock_path, encode(&info)?, WritePrecondition::DoesNotExist)
            .await?
        {
            return Ok(Acquisition::Acquired(self.guard(version, info)));
        }

        // Bind the expiry decision to the version used for the CAS below.
        let Some(meta) = self.storage.head(&self.lock_path).await? else {
            return self.contended();
        };
        let Some(existing) = self.read_lock().await? else {
            return self.contended();
        };
        if !existing.is_expired() {
            return Ok(Acquisition::Held(existing));
        }

        let takeover = LockInfo::new(
            &self.holder_id,
            ttl,
            existing.sequence_number.saturating_add(1),
            operation,
        );
        match self
            .storage
            .put(
                &self.lock_path,
                encode(&takeover)?,
                WritePrecondition::MatchesVersion(meta.version),
            )
            .await?
        {
            WriteResult::Success { version } => {
                Ok(Acquisition::Acquired(self.guard(version, takeover)))
            }
            WriteResult::PreconditionFailed { .. } => self.contended(),
        }
    }

    fn contended(&self) -> Result<Acquisition> {
        Ok(Acquisition::Held(LockInfo {
            holder_id: "unknown".into(),
            expires_at: Utc::now(),
            acquired_at: Utc::now(),
            sequence_number: 0,
            operation: Some(format!("concurrent change to {}", self.lock_path)),
        }))
    }

    fn guard(&self, version: String, info: LockInfo) -> LockGuard {
        LockGuard {
            storage: Arc::clone(&self.storage),
            lock_path: self.lock_path.clone(),
            holder_id: self.holder_id.clone(),
            version,
            sequence_number: info.sequence_number,
            acquired_at: info.acquired_at,
            released: false,
        }
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        read_lock(self.storage.as_ref(), &self.lock_path).await
    }

    /// Checks if the lock is currently held (regardless of holder).
    ///
    /// # Errors
    ///
    /// Returns an error if the lock state could not be read.
    pub async fn is_locked(&self) -> Result<bool> {
        Ok(self.read_lock().await?.is_some_and(|info| !info.is_expired()))
    }

    /// Reads the current lock info without acquiring the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock state could not be read.
    pub async fn read_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock().await
    }
}

fn encode(info: &LockInfo) -> Result<Bytes> {
    serde_json::to_vec(info)
        .map(Bytes::from)
        .map_err(|e| Error::internal(format!("serialize lock: {e}")))
}

async fn read_lock(storage: &dyn StorageBackend, path: &str) -> Result<Option<LockInfo>> {
    match storage.get(path).await {
        Ok(data) => serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| Error::internal(format!("parse lock: {e}"))),
        Err(Error::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// RAII guard for a held lock.
///
/// Released explicitly with [`LockGuard::release`]; dropping the guard
/// releases on a best-effort background task.
pub struct LockGuard {
    storage: Arc<dyn StorageBackend>,
    lock_path: String,
    holder_id: String,
    version: String,
    sequence_number: u64,
    acquired_at: DateTime<Utc>,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("lock_path", &self.lock_path)
            .field("holder_id", &self.holder_id)
            .field("sequence_number", &self.sequence_number)
            .finish_non_exhaustive()
    }
}

impl LockGuard {
    /// Holder ID of this acquisition.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Fencing token: strictly greater than any earlier acquisition's.
    #[must_use]
    pub const fn fencing_token(&self) -> u64 {
        self.sequence_number
    }

    /// Releases the lock.
    ///
    /// Writes an expired record with CAS instead of deleting, so a holder
    /// that took over in the meantime keeps its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock state could not be read or written.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        release(
            self.storage.as_ref(),
            &self.lock_path,
            &self.holder_id,
            &self.version,
            self.sequence_number,
            self.acquired_at,
        )
        .await
    }
}

async fn release(
    storage: &dyn StorageBackend,
    path: &str,
    holder_id: &str,
    version: &str,
    sequence_number: u64,
    acquired_at: DateTime<Utc>,
) -> Result<()> {
    let Some(info) = read_lock(storage, path).await? else {
        return Ok(());
    };
    if info.holder_id != holder_id {
        return Ok(());
    }
    let expired = LockInfo {
        holder_id: holder_id.to_string(),
        expires_at: Utc::now() - chrono::Duration::seconds(1),
        acquired_at,
        sequence_number,
        operation: None,
    };
    // PreconditionFailed means another holder took over; leave it alone.
    let _ = storage
        .put(
            path,
            encode(&expired)?,
            WritePrecondition::MatchesVersion(version.to_string()),
        )
        .await?;
    Ok(())
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // No runtime means shutdown; the TTL cleans up.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let storage = Arc::clone(&self.storage);
        let path = self.lock_path.clone();
        let holder = self.holder_id.clone();
        let version = self.version.clone();
        let sequence_number = self.sequence_number;
        let acquired_at = self.acquired_at;
        handle.spawn(async move {
            if let Err(e) = release(
                storage.as_ref(),
                &path,
                &holder,
                &version,
                sequence_number,
                acquired_at,
            )
            .await
            {
                tracing::warn!(%path, error = %e, "failed to release dropped lock");
            }
        });
    }
}
