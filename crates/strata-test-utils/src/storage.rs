//! Storage backend with operation tracing, latency and failure injection.
//!
//! Each zone in a test gets its own [`TracingMemoryBackend`], so assertions
//! like "nothing was written to the output zone" are a look at one zone's
//! recorded operations.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use strata_core::error::{Error, Result};
use strata_core::storage::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// One call against a traced zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// `get`
    Get {
        /// Key read.
        path: String,
    },
    /// `head`
    Head {
        /// Key inspected.
        path: String,
    },
    /// `put`
    Put {
        /// Key written.
        path: String,
        /// Body length.
        size: usize,
        /// Condition attached to the write.
        precondition: WritePrecondition,
    },
    /// `delete`
    Delete {
        /// Key removed.
        path: String,
    },
    /// `list`
    List {
        /// Prefix listed.
        prefix: String,
    },
}

impl StorageOp {
    /// Puts and deletes change a zone; everything else only observes it.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        matches!(self, Self::Put { .. } | Self::Delete { .. })
    }
}

/// A [`MemoryBackend`] zone that keeps a log of every call.
///
/// Latency is applied with `tokio::time::sleep`, so on a paused clock a
/// slow zone costs no wall time.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryBackend {
    inner: MemoryBackend,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_prefixes: Arc<Mutex<Vec<String>>>,
    latency: Option<Duration>,
}

impl TracingMemoryBackend {
    /// An empty, instant zone.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty zone where every call takes `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// The call log so far.
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Keys passed to `put`, in call order.
    pub fn writes(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                StorageOp::Put { path, .. } => Some(path),
                _ => None,
            })
            .collect()
    }

    /// True once any put or delete has been logged.
    pub fn was_mutated(&self) -> bool {
        self.operations().iter().any(StorageOp::is_mutation)
    }

    /// Empties the call log; stored objects stay.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Makes calls on keys under `prefix` fail with a storage error.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_prefixes.lock().expect("lock").push(prefix.into());
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        self.fail_prefixes.lock().expect("lock").clear();
    }

    /// Version token currently stored at `path`.
    pub fn version(&self, path: &str) -> Option<String> {
        self.inner.peek(path).map(|(_, version)| version)
    }

    /// Stored keys, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.inner.paths()
    }

    /// Stored bytes at `path`, without logging a call.
    pub fn peek(&self, path: &str) -> Option<Bytes> {
        self.inner.peek(path).map(|(data, _)| data)
    }

    async fn enter(&self, op: StorageOp, key: &str) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self
            .fail_prefixes
            .lock()
            .expect("lock")
            .iter()
            .any(|p| key.starts_with(p.as_str()))
        {
            return Err(Error::storage(format!("injected failure for path: {key}")));
        }
        self.operations.lock().expect("lock").push(op);
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageBackend for TracingMemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.enter(StorageOp::Get { path: path.into() }, path).await?;
        self.inner.get(path).await
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let op = StorageOp::Put {
            path: path.into(),
            size: data.len(),
            precondition: precondition.clone(),
        };
        self.enter(op, path).await?;
        self.inner.put(path, data, precondition).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.enter(StorageOp::Delete { path: path.into() }, path).await?;
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.enter(StorageOp::List { prefix: prefix.into() }, prefix).await?;
        self.inner.list(prefix).await
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        self.enter(StorageOp::Head { path: path.into() }, path).await?;
        self.inner.head(path).await
    }
}
