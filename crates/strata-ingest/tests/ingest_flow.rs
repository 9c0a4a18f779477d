//! Routing and invocation over traced zones.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;

use bytes::Bytes;
use strata_core::audit::MemoryAuditSink;
use strata_core::guarded::{Authorizer, GuardedStore};
use strata_core::policy::{actions, ExecutionIdentity, PolicyDocument, PolicyStatement, PrincipalKind};
use strata_core::storage::{StorageBackend, WritePrecondition};
use strata_ingest::prelude::*;
use strata_test_utils::{init_test_logging, SignalTransformation, TracingMemoryBackend};

struct Zones {
    landing: Arc<TracingMemoryBackend>,
    output: Arc<TracingMemoryBackend>,
    control: Arc<TracingMemoryBackend>,
}

impl Zones {
    fn new() -> Self {
        Self {
            landing: Arc::new(TracingMemoryBackend::new()),
            output: Arc::new(TracingMemoryBackend::new()),
            control: Arc::new(TracingMemoryBackend::new()),
        }
    }

    fn invoker(&self, transformation: Arc<SignalTransformation>) -> TransformInvoker {
        let role = ExecutionIdentity::new(
            "transform-role",
            "arn:identity::1:role/transform-role",
            PrincipalKind::ServiceRole,
            vec![PolicyDocument::builder("transform")
                .statement(PolicyStatement::allow(
                    "ReadLanding",
                    [actions::STORAGE_GET_OBJECT, actions::STORAGE_LIST_BUCKET],
                    ["arn:storage:::raw", "arn:storage:::raw/*"],
                ))
                .statement(PolicyStatement::allow(
                    "ReadWriteOutput",
                    [
                        actions::STORAGE_GET_OBJECT,
                        actions::STORAGE_PUT_OBJECT,
                        actions::STORAGE_LIST_BUCKET,
                    ],
                    ["arn:storage:::out", "arn:storage:::out/*"],
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
                    ["arn:compute:r:1:function:fnc"],
                ))
                .build()],
        );
        let audit = Arc::new(MemoryAuditSink::new());
        let authorizer = Authorizer::new(Arc::new(role), audit.clone());
        let landing: Arc<dyn StorageBackend> = self.landing.clone();
        let output: Arc<dyn StorageBackend> = self.output.clone();
        TransformInvoker::new(
            TransformFunction::new("fnc", "arn:compute:r:1:function:fnc", transformation),
            InvocationLedger::new(self.control.clone()),
            Authorizer::new(Arc::new(notifier), audit),
            GuardedStore::new("raw", landing, authorizer.clone()),
            GuardedStore::new("out", output, authorizer),
        )
    }

    async fn upload(&self, key: &str, body: &'static [u8]) -> ObjectCreatedEvent {
        self.landing
            .put(key, Bytes::from_static(body), WritePrecondition::None)
            .await
            .expect("upload");
        ObjectCreatedEvent::new(format!("seq-{key}"), "raw", key, body.len() as u64)
    }
}

async fn handle(
    filter: &TriggerFilter,
    invoker: &TransformInvoker,
    event: &ObjectCreatedEvent,
) -> Option<Dispatch> {
    match filter.route(event) {
        RoutingDecision::Matched(rule) => Some(invoker.dispatch(event, rule).await.expect("dispatch")),
        RoutingDecision::Ignored => None,
    }
}

#[tokio::test]
async fn accepted_upload_is_transformed_once_into_a_partition() {
    init_test_logging();
    let zones = Zones::new();
    let transformation = Arc::new(SignalTransformation::new());
    let invoker = zones.invoker(transformation.clone());
    let filter = TriggerFilter::from_suffixes([".MF4", ".MFC", ".MFE", ".MFM"]).expect("filter");

    let event = zones.upload("session-001.MF4", b"abc").await;
    let record = handle(&filter, &invoker, &event)
        .await
        .and_then(Dispatch::into_handle)
        .expect("invoked")
        .wait()
        .await
        .expect("join");

    assert_eq!(
        record.status,
        InvocationStatus::Succeeded {
            outputs: vec!["signals/partition=session-001/session-001.parquet".into()]
        }
    );
    assert_eq!(
        zones.output.paths(),
        vec!["signals/partition=session-001/session-001.parquet"]
    );

    // At-least-once delivery: the same event again is a no-op.
    let again = handle(&filter, &invoker, &event).await.expect("routed");
    assert!(matches!(again, Dispatch::Duplicate(_)));
    assert_eq!(transformation.calls(), 1);
    assert!(zones.landing.writes().iter().all(|k| k == "session-001.MF4"));
}

#[tokio::test]
async fn unaccepted_upload_leaves_output_untouched() {
    let zones = Zones::new();
    let transformation = Arc::new(SignalTransformation::new());
    let invoker = zones.invoker(transformation.clone());
    let filter = TriggerFilter::from_suffixes([".MF4", ".MFC", ".MFE", ".MFM"]).expect("filter");

    let event = zones.upload("notes.txt", b"hello").await;
    assert!(handle(&filter, &invoker, &event).await.is_none());

    assert_eq!(transformation.calls(), 0);
    assert!(zones.output.operations().is_empty());
    assert!(zones.control.paths().is_empty());
}

#[tokio::test]
async fn invocations_for_different_objects_are_isolated() {
    let zones = Zones::new();
    let transformation = Arc::new(SignalTransformation::new());
    let invoker = zones.invoker(transformation.clone());
    let filter = TriggerFilter::from_suffixes([".MF4"]).expect("filter");

    let good = zones.upload("a.MF4", b"xy").await;
    let empty = zones.upload("b.MF4", b"").await;
    let other = zones.upload("c.MF4", b"z").await;

    let mut handles = Vec::new();
    for event in [&good, &empty, &other] {
        handles.push(
            handle(&filter, &invoker, event)
                .await
                .and_then(Dispatch::into_handle)
                .expect("invoked"),
        );
    }
    let mut labels = Vec::new();
    for h in handles {
        labels.push(h.wait().await.expect("join").status.label());
    }

    assert_eq!(labels, vec!["succeeded", "failed", "succeeded"]);
    assert_eq!(zones.output.paths().len(), 2);
    assert_eq!(invoker.ledger().list().await.expect("ledger").len(), 3);
}
