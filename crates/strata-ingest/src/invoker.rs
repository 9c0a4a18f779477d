//! Transform invoker.
//!
//! Dispatch is fire-and-forget: [`TransformInvoker::dispatch`] reserves the
//! invocation in the ledger, spawns the transformation and returns at once.
//! Invocations for different objects run in parallel and never wait for each
//! other. There is no retry: a failed invocation is recorded and the source
//! object stays unprocessed until someone re-uploads or re-invokes it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::Instrument;

use strata_core::arn;
use strata_core::audit::{emit_with, AuditAction, AuditEvent, AuditSink};
use strata_core::guarded::{Authorizer, GuardedStore};
use strata_core::id::InvocationId;
use strata_core::observability::ingest_span;
use strata_core::policy::actions;

use crate::error::{Error, Result};
use crate::event::ObjectCreatedEvent;
use crate::filter::SuffixRule;
use crate::ledger::{InvocationLedger, InvocationRecord, InvocationStatus, Reservation};
use crate::metrics::IngestMetrics;
use crate::transform::{SourceObject, TransformContext, Transformation};

/// The deployed transformation function.
#[derive(Clone)]
pub struct TransformFunction {
    name: String,
    arn: String,
    transformation: Arc<dyn Transformation>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for TransformFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformFunction")
            .field("name", &self.name)
            .field("arn", &self.arn)
            .field("transformation", &self.transformation.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TransformFunction {
    /// Creates a function with no time budget.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        arn: impl Into<String>,
        transformation: Arc<dyn Transformation>,
    ) -> Self {
        Self {
            name: name.into(),
            arn: arn.into(),
            transformation,
            timeout: None,
        }
    }

    /// Bounds each invocation's wall-clock time.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Function ARN.
    #[must_use]
    pub fn arn(&self) -> &str {
        &self.arn
    }
}

/// Result of dispatching one event.
#[derive(Debug)]
pub enum Dispatch {
    /// A new invocation was started.
    Invoked(InvocationHandle),
    /// The delivery was seen before; nothing was started.
    Duplicate(InvocationRecord),
}

impl Dispatch {
    /// Returns the handle of a started invocation.
    #[must_use]
    pub fn into_handle(self) -> Option<InvocationHandle> {
        match self {
            Self::Invoked(handle) => Some(handle),
            Self::Duplicate(_) => None,
        }
    }
}

/// Handle to a running invocation.
///
/// Dropping the handle does not cancel the invocation.
#[derive(Debug)]
pub struct InvocationHandle {
    invocation_id: InvocationId,
    key: String,
    task: JoinHandle<InvocationRecord>,
}

impl InvocationHandle {
    /// The invocation's id.
    #[must_use]
    pub const fn invocation_id(&self) -> InvocationId {
        self.invocation_id
    }

    /// Source object key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns true once the invocation has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Aborted`] if the task was cancelled by the runtime.
    pub async fn wait(self) -> Result<InvocationRecord> {
        self.task.await.map_err(|e| Error::Aborted {
            message: e.to_string(),
        })
    }
}

/// Invokes the transformation exactly once per delivered event.
#[derive(Clone)]
pub struct TransformInvoker {
    function: TransformFunction,
    ledger: InvocationLedger,
    notifier: Authorizer,
    landing: GuardedStore,
    output: GuardedStore,
    metrics: IngestMetrics,
}

impl std::fmt::Debug for TransformInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformInvoker")
            .field("function", &self.function)
            .field("landing", &self.landing.bucket())
            .field("output", &self.output.bucket())
            .finish_non_exhaustive()
    }
}

impl TransformInvoker {
    /// Creates an invoker.
    ///
    /// `notifier` is the landing zone's notification principal; it must be
    /// allowed to invoke the function. `landing` and `output` are the
    /// transform identity's views of the two zones.
    #[must_use]
    pub fn new(
        function: TransformFunction,
        ledger: InvocationLedger,
        notifier: Authorizer,
        landing: GuardedStore,
        output: GuardedStore,
    ) -> Self {
        Self {
            function,
            ledger,
            notifier,
            landing,
            output,
            metrics: IngestMetrics::new(),
        }
    }

    /// The invocation ledger.
    #[must_use]
    pub fn ledger(&self) -> &InvocationLedger {
        &self.ledger
    }

    /// The deployed function.
    #[must_use]
    pub fn function(&self) -> &TransformFunction {
        &self.function
    }

    /// Dispatches a routed event.
    ///
    /// Returns once the invocation is reserved and spawned; it does not
    /// wait for the transformation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEvent`] for events outside the landing zone,
    /// `AccessDenied` if the notifier may not invoke the function, or a
    /// ledger storage error.
    pub async fn dispatch(&self, event: &ObjectCreatedEvent, rule: &SuffixRule) -> Result<Dispatch> {
        let span = ingest_span("dispatch", &event.bucket, &event.key);
        async {
            if event.bucket != self.landing.bucket() {
                return Err(Error::InvalidEvent {
                    message: format!(
                        "event for bucket '{}' delivered to the '{}' invoker",
                        event.bucket,
                        self.landing.bucket()
                    ),
                });
            }
            self.notifier
                .authorize(&actions::COMPUTE_INVOKE_FUNCTION, self.function.arn())
                .await?;

            let identity = self.landing.authorizer().identity().arn().to_string();
            match self.ledger.reserve(event, rule.id(), &identity).await? {
                Reservation::Duplicate(existing) => {
                    self.metrics.record_event("duplicate");
                    tracing::info!(
                        invocation_id = %existing.invocation_id,
                        event_id = %event.event_id,
                        status = existing.status.label(),
                        "duplicate delivery; not invoking again"
                    );
                    Ok(Dispatch::Duplicate(existing))
                }
                Reservation::New { record, version } => {
                    self.metrics.record_event("matched");
                    tracing::info!(
                        invocation_id = %record.invocation_id,
                        rule = rule.id(),
                        function = self.function.name(),
                        "invoking transformation"
                    );
                    self.audit(&record, AuditAction::TransformInvoked, rule.id())
                        .await;
                    Ok(Dispatch::Invoked(self.spawn(record, version)))
                }
            }
        }
        .instrument(span)
        .await
    }

    fn spawn(&self, record: InvocationRecord, version: String) -> InvocationHandle {
        let invocation_id = record.invocation_id;
        let key = record.key.clone();
        let invoker = self.clone();
        let span = ingest_span("transform", &record.bucket, &record.key);
        let task = tokio::spawn(async move { invoker.run(record, version).await }.instrument(span));
        InvocationHandle {
            invocation_id,
            key,
            task,
        }
    }

    async fn run(self, record: InvocationRecord, version: String) -> InvocationRecord {
        let started = Instant::now();
        let ctx = TransformContext::new(
            record.invocation_id,
            self.landing.clone(),
            self.output.clone(),
        );
        let source = SourceObject {
            bucket: record.bucket.clone(),
            key: record.key.clone(),
            size: record.size,
        };

        let attempt = AssertUnwindSafe(self.function.transformation.transform(&ctx, &source))
            .catch_unwind();
        let result = match self.function.timeout {
            Some(budget) => tokio::time::timeout(budget, attempt)
                .await
                .unwrap_or(Ok(Err(Error::TimedOut { after: budget }))),
            None => attempt.await,
        };

        let status = match result {
            Ok(Ok(outputs)) => InvocationStatus::Succeeded {
                outputs: outputs.into_iter().map(|o| o.key).collect(),
            },
            Ok(Err(e)) => InvocationStatus::Failed {
                reason: e.to_string(),
            },
            Err(_) => InvocationStatus::Failed {
                reason: "transformation panicked".into(),
            },
        };

        let elapsed = started.elapsed();
        self.metrics.record_invocation(status.label(), elapsed);
        match &status {
            InvocationStatus::Succeeded { outputs } => {
                tracing::info!(outputs = outputs.len(), ?elapsed, "transformation succeeded");
                self.audit(&record, AuditAction::TransformSucceeded, "succeeded")
                    .await;
            }
            InvocationStatus::Failed { reason } => {
                tracing::error!(%reason, ?elapsed, "transformation failed; object left unprocessed");
                self.audit(&record, AuditAction::TransformFailed, reason).await;
            }
            InvocationStatus::Pending => {}
        }

        match self.ledger.complete(record.clone(), &version, status.clone()).await {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(error = %e, "failed to record invocation outcome");
                InvocationRecord { status, ..record }
            }
        }
    }

    async fn audit(&self, record: &InvocationRecord, action: AuditAction, reason: &str) {
        let sink: Arc<dyn AuditSink> = self.landing.authorizer().audit();
        emit_with(
            sink.as_ref(),
            AuditEvent::builder()
                .action(action)
                .actor(self.landing.authorizer().identity().actor())
                .resource(arn::storage_object(&record.bucket, &record.key))
                .decision_reason(reason)
                .correlation_id(record.invocation_id.to_string()),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use strata_core::audit::MemoryAuditSink;
    use strata_core::policy::{ExecutionIdentity, PolicyDocument, PolicyStatement, PrincipalKind};
    use strata_core::storage::{MemoryBackend, StorageBackend, WritePrecondition};

    use crate::transform::OutputObject;

    struct Copying {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transformation for Copying {
        fn name(&self) -> &str {
            "copy"
        }

        async fn transform(
            &self,
            ctx: &TransformContext,
            source: &SourceObject,
        ) -> Result<Vec<OutputObject>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let data = ctx.read_source(source).await?;
            let out = ctx
                .write_output(&format!("copy/{}.bin", source.stem()), data)
                .await?;
            Ok(vec![out])
        }
    }

    #[derive(Default)]
    struct SizeRecording {
        seen: AtomicU64,
    }

    #[async_trait]
    impl Transformation for SizeRecording {
        fn name(&self) -> &str {
            "size"
        }

        async fn transform(&self, _: &TransformContext, source: &SourceObject) -> Result<Vec<OutputObject>> {
            self.seen.store(source.size, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    struct Failing;

    #[async_trait]
    impl Transformation for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn transform(&self, _: &TransformContext, _: &SourceObject) -> Result<Vec<OutputObject>> {
            Err(Error::transform("unsupported file version"))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Transformation for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn transform(&self, _: &TransformContext, _: &SourceObject) -> Result<Vec<OutputObject>> {
            panic!("decoder bug")
        }
    }

    struct Fixture {
        storage: Arc<MemoryBackend>,
        audit: Arc<MemoryAuditSink>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                storage: Arc::new(MemoryBackend::new()),
                audit: Arc::new(MemoryAuditSink::new()),
            }
        }

        fn invoker(&self, transformation: Arc<dyn Transformation>) -> TransformInvoker {
            let role = ExecutionIdentity::new(
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
                        [actions::STORAGE_PUT_OBJECT],
                        ["arn:storage:::out/*"],
                    ))
                    .build()],
            );
            let notifier = ExecutionIdentity::new(
                "raw-notifications",
                "arn:storage:::raw",
                PrincipalKind::ServiceRole,
                vec![PolicyDocument::builder("invoke")
                    .statement(PolicyStatement::allow(
                        "AllowInvokeFromLanding",
                        [actions::COMPUTE_INVOKE_FUNCTION],
                        ["arn:compute:r:1:function:transform-fnc"],
                    ))
                    .build()],
            );
            let audit: Arc<dyn AuditSink> = self.audit.clone();
            let authorizer = Authorizer::new(Arc::new(role), Arc::clone(&audit));
            let backend: Arc<dyn StorageBackend> = self.storage.clone();
            TransformInvoker::new(
                TransformFunction::new(
                    "transform-fnc",
                    "arn:compute:r:1:function:transform-fnc",
                    transformation,
                ),
                InvocationLedger::with_prefix(Arc::clone(&backend), "control/invocations/"),
                Authorizer::new(Arc::new(notifier), audit),
                GuardedStore::new("raw", Arc::clone(&backend), authorizer.clone()),
                GuardedStore::new("out", backend, authorizer),
            )
        }

        async fn upload(&self, key: &str) -> ObjectCreatedEvent {
            self.storage
                .put(key, Bytes::from_static(b"mdf"), WritePrecondition::None)
                .await
                .expect("upload");
            ObjectCreatedEvent::new(format!("evt-{key}"), "raw", key, 3)
        }
    }

    fn rule() -> SuffixRule {
        SuffixRule::new(".MF4").expect("rule")
    }

    #[tokio::test]
    async fn successful_invocation_is_recorded_and_audited() {
        let fx = Fixture::new();
        let copying = Arc::new(Copying {
            calls: AtomicUsize::new(0),
        });
        let invoker = fx.invoker(copying.clone());
        let event = fx.upload("session-001.MF4").await;

        let handle = invoker
            .dispatch(&event, &rule())
            .await
            .expect("dispatch")
            .into_handle()
            .expect("new invocation");
        let record = handle.wait().await.expect("join");

        assert_eq!(
            record.status,
            InvocationStatus::Succeeded {
                outputs: vec!["copy/session-001.bin".into()]
            }
        );
        assert_eq!(record.identity, "arn:identity::1:role/transform");
        assert_eq!(copying.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.audit.with_action(AuditAction::TransformInvoked).len(), 1);
        assert_eq!(fx.audit.with_action(AuditAction::TransformSucceeded).len(), 1);

        let stored = invoker.ledger().get(&event).await.expect("get").expect("present");
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn redelivered_event_is_not_invoked_twice() {
        let fx = Fixture::new();
        let copying = Arc::new(Copying {
            calls: AtomicUsize::new(0),
        });
        let invoker = fx.invoker(copying.clone());
        let event = fx.upload("session-001.MF4").await;

        let first = invoker.dispatch(&event, &rule()).await.expect("dispatch");
        let second = invoker.dispatch(&event, &rule()).await.expect("dispatch");
        first.into_handle().expect("new").wait().await.expect("join");

        assert!(matches!(second, Dispatch::Duplicate(_)));
        assert_eq!(copying.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_and_panics_are_recorded_without_retry() {
        let fx = Fixture::new();

        let event = fx.upload("bad.MF4").await;
        let record = fx
            .invoker(Arc::new(Failing))
            .dispatch(&event, &rule())
            .await
            .expect("dispatch")
            .into_handle()
            .expect("new")
            .wait()
            .await
            .expect("join");
        match record.status {
            InvocationStatus::Failed { reason } => assert!(reason.contains("unsupported file version")),
            other => panic!("unexpected status {other:?}"),
        }

        let event = fx.upload("crash.MF4").await;
        let record = fx
            .invoker(Arc::new(Panicking))
            .dispatch(&event, &rule())
            .await
            .expect("dispatch")
            .into_handle()
            .expect("new")
            .wait()
            .await
            .expect("join");
        assert_eq!(record.status.label(), "failed");
        assert_eq!(fx.audit.with_action(AuditAction::TransformFailed).len(), 2);
    }

    #[tokio::test]
    async fn foreign_bucket_events_are_rejected() {
        let fx = Fixture::new();
        let invoker = fx.invoker(Arc::new(Failing));
        let event = ObjectCreatedEvent::new("e", "other-bucket", "x.MF4", 1);
        let err = invoker.dispatch(&event, &rule()).await.expect_err("foreign");
        assert!(matches!(err, Error::InvalidEvent { .. }));
    }

    #[tokio::test]
    async fn transformation_sees_the_announced_object_size() {
        let fx = Fixture::new();
        let recording = Arc::new(SizeRecording::default());
        let invoker = fx.invoker(recording.clone());
        let mut event = fx.upload("session-004.MF4").await;
        event.size = 4096;

        let record = invoker
            .dispatch(&event, &rule())
            .await
            .expect("dispatch")
            .into_handle()
            .expect("new invocation")
            .wait()
            .await
            .expect("join");

        assert_eq!(recording.seen.load(Ordering::SeqCst), 4096);
        assert_eq!(record.size, 4096);
    }
}
