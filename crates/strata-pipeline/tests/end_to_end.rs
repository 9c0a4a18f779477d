//! Whole-pipeline flows: upload, transform, catalog, query.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use strata_catalog::runner::{RunStatus, TimerOutcome, TriggerOutcome};
use strata_core::audit::{AuditAction, MemoryAuditSink};
use strata_core::config::PipelineConfig;
use strata_core::guarded::{Authorizer, GuardedStore};
use strata_core::registry::{MemoryParameterRegistry, ParameterRegistry};
use strata_core::storage::{StorageBackend, WritePrecondition};
use strata_ingest::event::ObjectCreatedEvent;
use strata_ingest::invoker::Dispatch;
use strata_ingest::ledger::InvocationStatus;
use strata_pipeline::prelude::*;
use strata_query::execution::QueryState;
use strata_query::gateway::StartQueryRequest;
use strata_test_utils::{init_test_logging, test_config, SignalTransformation, TracingMemoryBackend};

struct Deployment {
    landing: Arc<TracingMemoryBackend>,
    output: Arc<TracingMemoryBackend>,
    results: Arc<TracingMemoryBackend>,
    control: Arc<TracingMemoryBackend>,
    registry: Arc<MemoryParameterRegistry>,
    audit: Arc<MemoryAuditSink>,
    transformation: Arc<SignalTransformation>,
    pipeline: Pipeline,
}

impl Deployment {
    fn new(config: &PipelineConfig) -> Self {
        Self::with_output(config, TracingMemoryBackend::new())
    }

    fn with_output(config: &PipelineConfig, output: TracingMemoryBackend) -> Self {
        let landing = Arc::new(TracingMemoryBackend::new());
        let output = Arc::new(output);
        let results = Arc::new(TracingMemoryBackend::new());
        let control = Arc::new(TracingMemoryBackend::new());
        let registry = Arc::new(MemoryParameterRegistry::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let transformation = Arc::new(SignalTransformation::new());
        let pipeline = Pipeline::provision(
            config,
            PipelineBackends {
                landing: landing.clone(),
                output: output.clone(),
                results: results.clone(),
                catalog: Arc::new(TracingMemoryBackend::new()),
                control: control.clone(),
            },
            transformation.clone(),
            registry.as_ref(),
            audit.clone(),
        )
        .expect("provision");
        Self {
            landing,
            output,
            results,
            control,
            registry,
            audit,
            transformation,
            pipeline,
        }
    }

    fn landing_bucket(&self) -> String {
        self.pipeline.plan().zones().landing.clone()
    }

    async fn upload(&self, key: &str, body: &'static [u8]) -> ObjectCreatedEvent {
        self.landing
            .put(key, Bytes::from_static(body), WritePrecondition::None)
            .await
            .expect("upload");
        ObjectCreatedEvent::new(format!("seq-{key}"), self.landing_bucket(), key, body.len() as u64)
    }

    async fn consumer(&self, name: &str) -> Authorizer {
        let grant = self.pipeline.issue_access(name).await.expect("issue");
        self.pipeline
            .authenticate(grant.credential.access_key_id(), grant.credential.secret())
            .expect("authenticate")
    }
}

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, h, m, s).single().expect("valid time")
}

#[tokio::test]
async fn upload_to_query_keeps_the_output_zone_read_only() {
    init_test_logging();
    let dep = Deployment::new(&test_config());

    // Upload and transform.
    let event = dep.upload("session-001.MF4", b"abc").await;
    let record = dep
        .pipeline
        .on_object_created(&event)
        .await
        .expect("dispatch")
        .and_then(Dispatch::into_handle)
        .expect("invoked")
        .wait()
        .await
        .expect("invocation");
    assert_eq!(
        record.status,
        InvocationStatus::Succeeded {
            outputs: vec!["signals/partition=session-001/session-001.parquet".into()]
        }
    );

    // Manual catalog run.
    let run = dep
        .pipeline
        .start_catalog_run()
        .await
        .expect("trigger")
        .into_handle()
        .expect("started")
        .wait()
        .await
        .expect("run");
    match &run.status {
        RunStatus::Succeeded { summary } => {
            assert_eq!(summary.tables, 1);
            assert_eq!(summary.partitions, 1);
        }
        other => panic!("catalog run ended {other:?}"),
    }
    let table = dep
        .pipeline
        .catalog()
        .get_table(dep.pipeline.plan().database(), "tbl_signals")
        .await
        .expect("table");
    assert!(table.partition(&["session-001".to_string()]).is_some());

    // Query as an access-boundary consumer.
    dep.output.clear_operations();
    let analyst = dep.consumer("analyst").await;
    let gateway = dep.pipeline.gateway();
    let workgroup = dep.pipeline.boundary().scope().workgroup.clone();
    let id = gateway
        .start_query_execution(
            &analyst,
            StartQueryRequest::new(
                "SELECT * FROM tbl_signals WHERE partition = 'session-001'",
                &workgroup,
                dep.pipeline.plan().database(),
            ),
        )
        .await
        .expect("start");
    let execution = gateway.wait(&analyst, id).await.expect("wait");
    assert_eq!(execution.state, QueryState::Succeeded);
    assert_eq!(execution.rows, Some(9));
    let results_bucket = &dep.pipeline.plan().zones().results;
    assert_eq!(
        execution.output_location,
        format!("s3://{results_bucket}/analyst/{id}.json")
    );

    let rows = gateway.get_query_results(&analyst, id).await.expect("results").rows;
    assert_eq!(rows.len(), 9);
    assert!(rows.iter().all(|row| row["partition"] == "session-001"));

    assert_eq!(dep.results.paths(), vec![format!("analyst/{id}.json")]);
    assert!(!dep.output.was_mutated());
    assert_eq!(dep.landing.writes(), vec!["session-001.MF4"]);
}

#[tokio::test]
async fn unaccepted_suffix_invokes_nothing() {
    let dep = Deployment::new(&test_config());
    let event = dep.upload("notes.txt", b"hello").await;

    assert!(dep
        .pipeline
        .on_object_created(&event)
        .await
        .expect("route")
        .is_none());
    assert_eq!(dep.transformation.calls(), 0);
    assert!(dep.output.operations().is_empty());
    assert!(dep.control.paths().is_empty());
    assert!(dep.audit.with_action(AuditAction::TransformInvoked).is_empty());
}

#[tokio::test]
async fn redelivered_notification_transforms_once() {
    let dep = Deployment::new(&test_config());
    dep.upload("logger 01/session-002.MFC", b"abcd").await;
    let payload = format!(
        r#"{{"Records":[{{
            "eventName":"ObjectCreated:Put",
            "eventTime":"2026-03-02T12:00:00.000Z",
            "s3":{{"bucket":{{"name":"{}"}},
                   "object":{{"key":"logger+01/session-002.MFC","size":4,"sequencer":"00A1"}}}}
        }}]}}"#,
        dep.landing_bucket()
    );

    let first = dep.pipeline.on_notification(payload.as_bytes()).await.expect("first");
    assert_eq!(first.len(), 1);
    for dispatch in first {
        let dispatch = dispatch.expect("dispatched");
        dispatch.into_handle().expect("invoked").wait().await.expect("invocation");
    }
    let again = dep.pipeline.on_notification(payload.as_bytes()).await.expect("again");
    assert!(matches!(again.as_slice(), [Ok(Dispatch::Duplicate(_))]));
    assert_eq!(dep.transformation.calls(), 1);
    assert_eq!(
        dep.output.paths(),
        vec!["signals/partition=session-002/session-002.parquet"]
    );
}

#[tokio::test]
async fn rejected_record_does_not_stop_the_rest_of_the_notification() {
    let dep = Deployment::new(&test_config());
    dep.upload("session-009.MF4", b"abcdef").await;
    let payload = format!(
        r#"{{"Records":[
            {{"eventName":"ObjectCreated:Put","eventTime":"2026-03-02T12:00:00.000Z",
              "s3":{{"bucket":{{"name":"some-other-bucket"}},
                     "object":{{"key":"session-008.MF4","size":6,"sequencer":"00B1"}}}}}},
            {{"eventName":"ObjectCreated:Put","eventTime":"2026-03-02T12:00:01.000Z",
              "s3":{{"bucket":{{"name":"{}"}},
                     "object":{{"key":"session-009.MF4","size":6,"sequencer":"00B2"}}}}}}
        ]}}"#,
        dep.landing_bucket()
    );

    let mut outcomes = dep.pipeline.on_notification(payload.as_bytes()).await.expect("parse");
    assert_eq!(outcomes.len(), 2);
    assert!(
        matches!(&outcomes[0], Err(Error::UnknownBucket(bucket)) if bucket == "some-other-bucket")
    );
    let dispatch = outcomes.pop().expect("second record").expect("dispatched");
    dispatch.into_handle().expect("invoked").wait().await.expect("invocation");

    assert_eq!(dep.transformation.calls(), 1);
    let rejected = dep.audit.with_action(AuditAction::EventRejected);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].decision_reason, "unknown_bucket");
}

#[tokio::test(start_paused = true)]
async fn overlapping_scheduled_ticks_start_one_run() {
    let config = PipelineConfig {
        catalog_schedule: "* * * * * *".into(),
        ..test_config()
    };
    let dep = Deployment::with_output(
        &config,
        TracingMemoryBackend::with_latency(Duration::from_secs(600)),
    );

    let mut first = dep.pipeline.on_timer(at(12, 0, 0)).await.expect("first tick");
    assert_eq!(first.len(), 1);
    let Some(TimerOutcome::Fired {
        tick,
        outcome: TriggerOutcome::Started(handle),
        ..
    }) = first.pop()
    else {
        panic!("first tick did not start a run");
    };
    assert_eq!(tick, at(12, 0, 0));

    let second = dep.pipeline.on_timer(at(12, 0, 1)).await.expect("second tick");
    assert!(matches!(
        second.as_slice(),
        [TimerOutcome::Fired {
            outcome: TriggerOutcome::Skipped { active_run: Some(active) },
            ..
        }] if *active == handle.run_id()
    ));
    assert!(matches!(
        dep.pipeline.start_catalog_run().await.expect("manual"),
        TriggerOutcome::Skipped { .. }
    ));
    assert_eq!(dep.pipeline.runner().runs().await.expect("runs").len(), 1);

    let finished = handle.wait().await.expect("run");
    assert!(matches!(finished.status, RunStatus::Succeeded { .. }));

    // The lock is released once the run ends.
    let later = dep.pipeline.on_timer(at(12, 10, 1)).await.expect("later tick");
    assert!(matches!(
        later.as_slice(),
        [TimerOutcome::Fired {
            outcome: TriggerOutcome::Started(_),
            ..
        }]
    ));
    assert_eq!(dep.pipeline.runner().runs().await.expect("runs").len(), 2);
}

#[tokio::test]
async fn scheduled_trigger_is_disarmed_by_default() {
    let dep = Deployment::new(&PipelineConfig {
        stage: "test".into(),
        ..PipelineConfig::default()
    });
    let outcomes = dep.pipeline.on_timer(at(12, 0, 30)).await.expect("tick");
    assert!(matches!(outcomes.as_slice(), [TimerOutcome::Disarmed { .. }]));
    assert!(dep.pipeline.runner().runs().await.expect("runs").is_empty());
}

#[tokio::test]
async fn consumers_cannot_write_the_data_zones() {
    let dep = Deployment::new(&test_config());
    dep.upload("session-003.MF4", b"ab").await;
    let analyst = dep.consumer("analyst").await;
    let zones = dep.pipeline.plan().zones().clone();

    let output: Arc<dyn StorageBackend> = dep.output.clone();
    let output = GuardedStore::new(&zones.output, output, analyst.clone());
    let err = output
        .put("signals/forged.parquet", Bytes::from_static(b"x"), WritePrecondition::None)
        .await
        .expect_err("output write must be denied");
    assert!(err.is_access_denied());

    let landing: Arc<dyn StorageBackend> = dep.landing.clone();
    let landing = GuardedStore::new(&zones.landing, landing, analyst);
    assert!(landing
        .get("session-003.MF4")
        .await
        .expect_err("landing read must be denied")
        .is_access_denied());

    assert!(!dep.output.was_mutated());
    assert!(!dep.audit.with_action(AuditAction::AccessDeny).is_empty());
}

#[tokio::test]
async fn expired_landing_objects_are_swept() {
    let dep = Deployment::new(&test_config());
    dep.upload("session-004.MF4", b"abc").await;

    assert!(dep.pipeline.sweep_landing(Utc::now()).await.expect("sweep").is_empty());
    let deleted = dep
        .pipeline
        .sweep_landing(Utc::now() + chrono::Duration::days(31))
        .await
        .expect("sweep");
    assert_eq!(deleted, vec!["session-004.MF4"]);
    assert!(dep.landing.paths().is_empty());
}

#[test]
fn provisioning_publishes_resource_identifiers() {
    let dep = Deployment::new(&test_config());
    let bucket = dep
        .registry
        .get("/strata/test/pipeline/landing-bucket")
        .expect("landing bucket parameter");
    assert_eq!(bucket.value, "strata-test-raw-data");
    let workgroup = dep
        .registry
        .get("/strata/test/pipeline/query-workgroup")
        .expect("workgroup parameter");
    assert_eq!(workgroup.value, dep.pipeline.boundary().scope().workgroup);
}
