//! The permission layer.
//!
//! [`Authorizer`] binds an [`ExecutionIdentity`] to an audit sink and is the
//! single place where `AccessDenied` is produced. [`GuardedStore`] is a view
//! of one storage zone through an authorizer: every object operation is
//! checked against the identity's policies before it reaches the backend.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;

use crate::arn;
use crate::audit::{emit_with, AuditAction, AuditEvent, AuditSink, TracingAuditSink};
use crate::error::{Error, Result};
use crate::policy::{actions, Action, ExecutionIdentity, RequestContext};
use crate::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// Counter: requests rejected by the permission layer.
pub const ACCESS_DENIED_TOTAL: &str = "strata_access_denied_total";

/// Checks requests on behalf of one identity.
#[derive(Clone)]
pub struct Authorizer {
    identity: Arc<ExecutionIdentity>,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("identity", &self.identity.name())
            .finish_non_exhaustive()
    }
}

impl Authorizer {
    /// Creates an authorizer that records denials in `audit`.
    #[must_use]
    pub fn new(identity: Arc<ExecutionIdentity>, audit: Arc<dyn AuditSink>) -> Self {
        Self { identity, audit }
    }

    /// Creates an authorizer that only logs denials.
    #[must_use]
    pub fn without_audit(identity: Arc<ExecutionIdentity>) -> Self {
        Self::new(identity, Arc::new(TracingAuditSink))
    }

    /// The identity requests are checked for.
    #[must_use]
    pub fn identity(&self) -> &ExecutionIdentity {
        &self.identity
    }

    /// Shared handle to the identity.
    #[must_use]
    pub fn identity_arc(&self) -> Arc<ExecutionIdentity> {
        Arc::clone(&self.identity)
    }

    /// The sink denials are recorded in.
    #[must_use]
    pub fn audit(&self) -> Arc<dyn AuditSink> {
        Arc::clone(&self.audit)
    }

    /// Returns true if the request would be allowed; records nothing.
    #[must_use]
    pub fn permits(&self, action: &Action, resource: &str) -> bool {
        self.identity.evaluate(action, resource).is_allowed()
    }

    /// Checks a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccessDenied`] when the identity's policies do not
    /// allow `action` on `resource`. The denial is logged, counted and
    /// audited before returning.
    pub async fn authorize(&self, action: &Action, resource: &str) -> Result<()> {
        self.authorize_request(action, resource, &RequestContext::default())
            .await
    }

    /// Like [`Self::authorize`], with request attributes for statement
    /// conditions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccessDenied`] when the request is not allowed.
    pub async fn authorize_request(
        &self,
        action: &Action,
        resource: &str,
        request: &RequestContext<'_>,
    ) -> Result<()> {
        let decision = self.identity.evaluate_request(action, resource, request);
        if decision.is_allowed() {
            tracing::trace!(
                principal = self.identity.name(),
                %action,
                resource,
                "access allowed"
            );
            return Ok(());
        }

        tracing::warn!(
            principal = self.identity.name(),
            %action,
            resource,
            reason = %decision.reason(),
            "access denied"
        );
        counter!(ACCESS_DENIED_TOTAL, "action" => action.to_string()).increment(1);
        emit_with(
            self.audit.as_ref(),
            AuditEvent::builder()
                .action(AuditAction::AccessDeny)
                .actor(self.identity.actor())
                .resource(resource)
                .decision_reason(format!("{action} {}", decision.reason())),
        )
        .await;

        Err(Error::AccessDenied {
            principal: self.identity.arn().to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
        })
    }
}

/// A storage zone seen through an identity's permissions.
#[derive(Clone)]
pub struct GuardedStore {
    bucket: String,
    backend: Arc<dyn StorageBackend>,
    authorizer: Authorizer,
}

impl std::fmt::Debug for GuardedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedStore")
            .field("bucket", &self.bucket)
            .field("authorizer", &self.authorizer)
            .finish_non_exhaustive()
    }
}

impl GuardedStore {
    /// Creates a view of `bucket` for the authorizer's identity.
    #[must_use]
    pub fn new(
        bucket: impl Into<String>,
        backend: Arc<dyn StorageBackend>,
        authorizer: Authorizer,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            backend,
            authorizer,
        }
    }

    /// Bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The authorizer checking this view.
    #[must_use]
    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    /// Location URI of a key in this bucket.
    #[must_use]
    pub fn uri(&self, key: &str) -> String {
        format!("s3://{}/{key}", self.bucket)
    }

    /// Reads an object.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` without `storage:GetObject`, or the backend error.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        self.authorizer
            .authorize(&actions::STORAGE_GET_OBJECT, &arn::storage_object(&self.bucket, key))
            .await?;
        self.backend.get(key).await
    }

    /// Reads object metadata.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` without `storage:GetObject`, or the backend error.
    pub async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        self.authorizer
            .authorize(&actions::STORAGE_GET_OBJECT, &arn::storage_object(&self.bucket, key))
            .await?;
        self.backend.head(key).await
    }

    /// Writes an object in a single visible operation.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` without `storage:PutObject`, or the backend error.
    pub async fn put(
        &self,
        key: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.authorizer
            .authorize(&actions::STORAGE_PUT_OBJECT, &arn::storage_object(&self.bucket, key))
            .await?;
        self.backend.put(key, data, precondition).await
    }

    /// Deletes an object.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` without `storage:DeleteObject`, or the backend error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.authorizer
            .authorize(
                &actions::STORAGE_DELETE_OBJECT,
                &arn::storage_object(&self.bucket, key),
            )
            .await?;
        self.backend.delete(key).await
    }

    /// Lists keys under `prefix`, sorted by path.
    ///
    /// Requires `storage:ListBucket` on the bucket. Keys the identity cannot
    /// read are left out of the listing.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` without `storage:ListBucket`, or the backend error.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.authorizer
            .authorize_request(
                &actions::STORAGE_LIST_BUCKET,
                &arn::storage_bucket(&self.bucket),
                &RequestContext::listing(prefix),
            )
            .await?;
        let mut listed: Vec<ObjectMeta> = self
            .backend
            .list(prefix)
            .await?
            .into_iter()
            .filter(|meta| {
                self.authorizer.permits(
                    &actions::STORAGE_GET_OBJECT,
                    &arn::storage_object(&self.bucket, &meta.path),
                )
            })
            .collect();
        listed.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listed)
    }

    /// Abandons any partially uploaded object at `key`.
    ///
    /// Writes through this view are single-shot, so there is never a
    /// partial upload to discard; the call only enforces the permission.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` without `storage:AbortMultipartUpload`.
    pub async fn abort_multipart_upload(&self, key: &str) -> Result<()> {
        self.authorizer
            .authorize(
                &actions::STORAGE_ABORT_MULTIPART_UPLOAD,
                &arn::storage_object(&self.bucket, key),
            )
            .await
    }
}
