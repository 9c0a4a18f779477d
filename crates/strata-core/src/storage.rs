//! Storage backend abstraction for object storage zones.
//!
//! Every zone (landing, output, results, control) is an object store with
//! the same contract:
//! - Conditional writes with preconditions, so each object becomes visible
//!   in a single atomic operation
//! - Object metadata including `last_modified` (drives lifecycle expiry)
//! - Prefix listing for scanners
//!
//! The version token is an opaque `String` so S3 `ETag`s, GCS generations
//! and the in-memory counter all fit.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Condition a write must satisfy to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Create-only: the path must be free.
    DoesNotExist,
    /// Compare-and-swap against a version token from `head` or `list`.
    MatchesVersion(String),
    /// Last writer wins.
    None,
}

/// Outcome of a write. A failed precondition is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// The object was stored.
    Success {
        /// Version token of the stored object.
        version: String,
    },
    /// The precondition did not hold; nothing was written.
    PreconditionFailed {
        /// Version currently at the path (`"0"` when absent).
        current_version: String,
    },
}

impl WriteResult {
    /// Returns true if the write was applied.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// What a zone knows about one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Key within the zone.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Version token usable with [`WritePrecondition::MatchesVersion`].
    pub version: String,
    /// When the object was last written; lifecycle rules age objects by it.
    pub last_modified: Option<DateTime<Utc>>,
    /// Quoted entity tag, when the backend exposes one.
    pub etag: Option<String>,
}

/// One storage zone.
///
/// Components never hold a backend directly; they go through a
/// [`GuardedStore`](crate::guarded::GuardedStore) bound to their identity.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads a whole object, or `Error::NotFound`.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes a whole object if `precondition` holds.
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Removes an object. Removing a missing object is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects under `prefix`, in no particular order.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Object metadata, or `None` if the path is free.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;
}

/// Process-local zone used by tests and single-process deployments.
///
/// Versions are a per-path counter starting at 1.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: u64,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, path: &str) -> ObjectMeta {
        ObjectMeta {
            path: path.to_string(),
            size: self.data.len() as u64,
            version: self.version.to_string(),
            last_modified: Some(self.last_modified),
            etag: Some(format!("\"{}\"", self.version)),
        }
    }
}

/// Returns the version to report if `precondition` rejects a write over
/// `current`.
fn rejected_by(precondition: &WritePrecondition, current: Option<&StoredObject>) -> Option<String> {
    match (precondition, current) {
        (WritePrecondition::None, _) | (WritePrecondition::DoesNotExist, None) => None,
        (WritePrecondition::DoesNotExist, Some(obj)) => Some(obj.version.to_string()),
        (WritePrecondition::MatchesVersion(_), None) => Some("0".to_string()),
        (WritePrecondition::MatchesVersion(expected), Some(obj)) => {
            (expected.parse::<u64>().ok() != Some(obj.version)).then(|| obj.version.to_string())
        }
    }
}

impl MemoryBackend {
    /// Creates an empty zone.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backdates or postdates an object so lifecycle rules can be
    /// exercised without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the object does not exist.
    pub fn set_last_modified(&self, path: &str, at: DateTime<Utc>) -> Result<()> {
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        let object = objects.get_mut(path).ok_or_else(|| not_found(path))?;
        object.last_modified = at;
        Ok(())
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().map_or(0, |o| o.len())
    }

    /// True if the zone holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored path, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .objects
            .read()
            .map_or_else(|_| Vec::new(), |o| o.keys().cloned().collect());
        paths.sort();
        paths
    }

    /// Stored bytes and version of a path, read synchronously.
    #[must_use]
    pub fn peek(&self, path: &str) -> Option<(Bytes, String)> {
        self.objects
            .read()
            .ok()?
            .get(path)
            .map(|o| (o.data.clone(), o.version.to_string()))
    }
}

fn poisoned() -> Error {
    Error::Internal {
        message: "memory zone lock poisoned".into(),
    }
}

fn not_found(path: &str) -> Error {
    Error::NotFound(format!("object not found: {path}"))
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| not_found(path))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        let current = objects.get(path);
        if let Some(current_version) = rejected_by(&precondition, current) {
            return Ok(WriteResult::PreconditionFailed { current_version });
        }

        let version = current.map_or(1, |o| o.version + 1);
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                version,
                last_modified: Utc::now(),
            },
        );
        Ok(WriteResult::Success {
            version: version.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.write().map_err(|_| poisoned())?.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, obj)| obj.meta(path))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects.get(path).map(|obj| obj.meta(path)))
    }
}

/// Reads and decodes a JSON document, returning its version alongside.
///
/// Returns `Ok(None)` when the object does not exist.
///
/// # Errors
///
/// Returns an error if the read fails or the document does not decode.
pub async fn read_json<T, S>(storage: &S, path: &str) -> Result<Option<(T, String)>>
where
    T: DeserializeOwned,
    S: StorageBackend + ?Sized,
{
    let Some(meta) = storage.head(path).await? else {
        return Ok(None);
    };
    let data = match storage.get(path).await {
        Ok(data) => data,
        Err(Error::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    let value = serde_json::from_slice(&data)
        .map_err(|e| Error::serialization(format!("decode {path}: {e}")))?;
    Ok(Some((value, meta.version)))
}

/// Encodes a value as JSON and writes it with the given precondition.
///
/// # Errors
///
/// Returns an error if encoding or the write fails.
pub async fn write_json<T, S>(
    storage: &S,
    path: &str,
    value: &T,
    precondition: WritePrecondition,
) -> Result<WriteResult>
where
    T: Serialize + ?Sized,
    S: StorageBackend + ?Sized,
{
    let bytes = serde_json::to_vec(value)
        .map_err(|e| Error::serialization(format!("encode {path}: {e}")))?;
    storage.put(path, Bytes::from(bytes), precondition).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        let data = Bytes::from("hello world");

        let result = backend
            .put("test/file.txt", data.clone(), WritePrecondition::None)
            .await
            .expect("put should succeed");

        assert!(matches!(result, WriteResult::Success { ref version } if version == "1"));

        let retrieved = backend
            .get("test/file.txt")
            .await
            .expect("get should succeed");
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn test_does_not_exist_precondition_rejects_second_writer() {
        let backend = MemoryBackend::new();
        let first = backend
            .put("k", Bytes::from("a"), WritePrecondition::DoesNotExist)
            .await
            .expect("put");
        let second = backend
            .put("k", Bytes::from("b"), WritePrecondition::DoesNotExist)
            .await
            .expect("put");

        assert!(first.is_success());
        assert_eq!(
            second,
            WriteResult::PreconditionFailed {
                current_version: "1".into()
            }
        );
        assert_eq!(backend.get("k").await.expect("get"), Bytes::from("a"));
    }

    #[tokio::test]
    async fn test_matches_version_precondition() {
        let backend = MemoryBackend::new();
        backend
            .put("k", Bytes::from("a"), WritePrecondition::None)
            .await
            .expect("put");

        let stale = backend
            .put(
                "k",
                Bytes::from("b"),
                WritePrecondition::MatchesVersion("7".into()),
            )
            .await
            .expect("put");
        assert!(!stale.is_success());

        let fresh = backend
            .put(
                "k",
                Bytes::from("c"),
                WritePrecondition::MatchesVersion("1".into()),
            )
            .await
            .expect("put");
        assert_eq!(
            fresh,
            WriteResult::Success {
                version: "2".into()
            }
        );
    }

    #[tokio::test]
    async fn test_object_meta_has_required_fields() {
        let backend = MemoryBackend::new();
        backend
            .put("test.txt", Bytes::from("data"), WritePrecondition::None)
            .await
            .expect("put should succeed");

        let meta = backend
            .head("test.txt")
            .await
            .expect("head should succeed")
            .expect("object should exist");

        assert_eq!(meta.path, "test.txt");
        assert_eq!(meta.size, 4);
        assert!(!meta.version.is_empty(), "must have version");
        assert!(meta.last_modified.is_some(), "must have last_modified");
        assert!(meta.etag.is_some(), "must have etag");
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix_and_delete_is_idempotent() {
        let backend = MemoryBackend::new();
        for path in ["a/1", "a/2", "b/1"] {
            backend
                .put(path, Bytes::from("x"), WritePrecondition::None)
                .await
                .expect("put");
        }
        let mut listed: Vec<_> = backend
            .list("a/")
            .await
            .expect("list")
            .into_iter()
            .map(|m| m.path)
            .collect();
        listed.sort();
        assert_eq!(listed, vec!["a/1", "a/2"]);

        backend.delete("a/1").await.expect("delete");
        backend.delete("a/1").await.expect("second delete");
        assert_eq!(backend.paths(), vec!["a/2", "b/1"]);
        assert_eq!(backend.peek("b/1"), Some((Bytes::from("x"), "1".to_string())));
    }

    #[tokio::test]
    async fn test_json_helpers_report_version() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Doc {
            n: u32,
        }

        let backend = MemoryBackend::new();
        assert!(read_json::<Doc, _>(&backend, "doc.json")
            .await
            .expect("read")
            .is_none());

        write_json(&backend, "doc.json", &Doc { n: 3 }, WritePrecondition::None)
            .await
            .expect("write");
        let (doc, version) = read_json::<Doc, _>(&backend, "doc.json")
            .await
            .expect("read")
            .expect("present");
        assert_eq!(doc, Doc { n: 3 });
        assert_eq!(version, "1");
    }
}
