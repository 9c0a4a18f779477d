//! Transformation contract.
//!
//! A [`Transformation`] converts one landed object into zero or more output
//! objects. It only sees the zones through the transform identity's guarded
//! views: it can read the landing zone and read or write the output zone,
//! nothing else. Each output object is written with a single put, so a
//! concurrent catalog scan sees either the whole object or nothing.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use strata_core::guarded::GuardedStore;
use strata_core::id::InvocationId;
use strata_core::storage::{WritePrecondition, WriteResult};

use crate::error::{Error, Result};
use crate::event::ObjectCreatedEvent;

/// The landed object handed to a transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceObject {
    /// Landing zone bucket.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
}

impl From<&ObjectCreatedEvent> for SourceObject {
    fn from(event: &ObjectCreatedEvent) -> Self {
        Self {
            bucket: event.bucket.clone(),
            key: event.key.clone(),
            size: event.size,
        }
    }
}

impl SourceObject {
    /// File name without directories or extension.
    #[must_use]
    pub fn stem(&self) -> &str {
        let name = self.key.rsplit('/').next().unwrap_or(&self.key);
        name.rfind('.').map_or(name, |idx| &name[..idx])
    }
}

/// One object a transformation wrote to the output zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputObject {
    /// Output zone key.
    pub key: String,
    /// Bytes written.
    pub size: u64,
}

/// What a transformation may touch during one invocation.
#[derive(Debug, Clone)]
pub struct TransformContext {
    invocation_id: InvocationId,
    landing: GuardedStore,
    output: GuardedStore,
}

impl TransformContext {
    /// Creates a context from the transform identity's zone views.
    #[must_use]
    pub fn new(invocation_id: InvocationId, landing: GuardedStore, output: GuardedStore) -> Self {
        Self {
            invocation_id,
            landing,
            output,
        }
    }

    /// The invocation being served.
    #[must_use]
    pub const fn invocation_id(&self) -> InvocationId {
        self.invocation_id
    }

    /// Output zone bucket name.
    #[must_use]
    pub fn output_bucket(&self) -> &str {
        self.output.bucket()
    }

    /// Reads the source object.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` if the object is outside the landing zone view,
    /// or the storage error.
    pub async fn read_source(&self, source: &SourceObject) -> Result<Bytes> {
        if source.bucket != self.landing.bucket() {
            return Err(Error::transform(format!(
                "source bucket '{}' is not the landing zone '{}'",
                source.bucket,
                self.landing.bucket()
            )));
        }
        Ok(self.landing.get(&source.key).await?)
    }

    /// Writes one output object in a single visible operation.
    ///
    /// Rewriting the same key replaces the object, so re-invoking a source
    /// converges on the same output.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` if the write is outside the output zone view,
    /// or the storage error.
    pub async fn write_output(&self, key: &str, data: Bytes) -> Result<OutputObject> {
        let size = data.len() as u64;
        match self.output.put(key, data, WritePrecondition::None).await? {
            WriteResult::Success { .. } => Ok(OutputObject {
                key: key.to_string(),
                size,
            }),
            WriteResult::PreconditionFailed { current_version } => Err(Error::transform(
                format!("unconditional write to {key} rejected at version {current_version}"),
            )),
        }
    }

    /// Reads an object back from the output zone.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` or the storage error.
    pub async fn read_output(&self, key: &str) -> Result<Bytes> {
        Ok(self.output.get(key).await?)
    }
}

/// Converts one landed object into output-zone objects.
#[async_trait]
pub trait Transformation: Send + Sync + 'static {
    /// Name used in logs and audit records.
    fn name(&self) -> &str;

    /// Transforms `source`, returning what was written.
    ///
    /// Any error aborts the invocation. Objects already written stay in
    /// place; nothing is registered in the catalog by this step.
    async fn transform(
        &self,
        ctx: &TransformContext,
        source: &SourceObject,
    ) -> Result<Vec<OutputObject>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_core::guarded::Authorizer;
    use strata_core::policy::{actions, ExecutionIdentity, PolicyDocument, PolicyStatement, PrincipalKind};
    use strata_core::storage::{MemoryBackend, StorageBackend};

    fn context(storage: &Arc<MemoryBackend>) -> TransformContext {
        let identity = ExecutionIdentity::new(
            "transform",
            "arn:identity::1:role/transform",
            PrincipalKind::ServiceRole,
            vec![PolicyDocument::builder("transform")
                .statement(PolicyStatement::allow(
                    "ReadLanding",
                    [actions::STORAGE_GET_OBJECT],
                    ["arn:storage:::raw/*"],
                ))
                .statement(PolicyStatement::allow(
                    "WriteOutput",
                    [actions::STORAGE_GET_OBJECT, actions::STORAGE_PUT_OBJECT],
                    ["arn:storage:::out/*"],
                ))
                .build()],
        );
        let authorizer = Authorizer::without_audit(Arc::new(identity));
        let backend: Arc<dyn StorageBackend> = storage.clone();
        TransformContext::new(
            InvocationId::generate(),
            GuardedStore::new("raw", Arc::clone(&backend), authorizer.clone()),
            GuardedStore::new("out", backend, authorizer),
        )
    }

    #[tokio::test]
    async fn context_reads_landing_and_writes_output() {
        let storage = Arc::new(MemoryBackend::new());
        storage
            .put("a.MF4", Bytes::from_static(b"raw"), WritePrecondition::None)
            .await
            .expect("seed");
        let ctx = context(&storage);

        let source = SourceObject {
            bucket: "raw".into(),
            key: "a.MF4".into(),
            size: 3,
        };
        assert_eq!(ctx.read_source(&source).await.expect("read"), "raw");
        let written = ctx
            .write_output("signals/a.parquet", Bytes::from_static(b"pq"))
            .await
            .expect("write");
        assert_eq!(written.size, 2);
        assert_eq!(source.stem(), "a");
    }

    #[tokio::test]
    async fn context_cannot_read_foreign_bucket() {
        let storage = Arc::new(MemoryBackend::new());
        let ctx = context(&storage);
        let err = ctx
            .read_source(&SourceObject {
                bucket: "elsewhere".into(),
                key: "a.MF4".into(),
                size: 0,
            })
            .await
            .expect_err("foreign bucket");
        assert!(matches!(err, Error::Transform { .. }));
    }
}
