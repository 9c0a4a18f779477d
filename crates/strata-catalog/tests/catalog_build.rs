//! Builder runs over a traced output zone.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use strata_catalog::prelude::*;
use strata_core::arn::ArnScope;
use strata_core::audit::{AuditAction, MemoryAuditSink};
use strata_core::guarded::{Authorizer, GuardedStore};
use strata_core::policy::{actions, ExecutionIdentity, PolicyDocument, PolicyStatement, PrincipalKind};
use strata_core::storage::{StorageBackend, WritePrecondition};
use strata_test_utils::{init_test_logging, parquet_bytes, signal_batch, TracingMemoryBackend};

fn catalog_role() -> Arc<ExecutionIdentity> {
    Arc::new(ExecutionIdentity::new(
        "catalog-service-role",
        "arn:identity::1:role/catalog-service-role",
        PrincipalKind::ServiceRole,
        vec![PolicyDocument::builder("catalog")
            .statement(PolicyStatement::allow(
                "ReadOutput",
                [actions::STORAGE_GET_OBJECT, actions::STORAGE_LIST_BUCKET],
                ["arn:storage:::out", "arn:storage:::out/*"],
            ))
            .statement(PolicyStatement::allow(
                "WriteCatalog",
                [
                    actions::CATALOG_CREATE_DATABASE,
                    actions::CATALOG_UPDATE_DATABASE,
                    actions::CATALOG_UPDATE_TABLE,
                    actions::CATALOG_BATCH_CREATE_PARTITION,
                    actions::CATALOG_GET_DATABASE,
                    actions::CATALOG_GET_TABLE,
                    actions::CATALOG_GET_PARTITIONS,
                ],
                ["arn:catalog:r:1:*"],
            ))
            .statement(PolicyStatement::allow(
                "StartJob",
                [actions::CATALOG_START_JOB_RUN],
                ["arn:catalog:r:1:job/*"],
            ))
            .build()],
    ))
}

struct Fixture {
    output: Arc<TracingMemoryBackend>,
    catalog: Arc<TracingMemoryBackend>,
    control: Arc<TracingMemoryBackend>,
    audit: Arc<MemoryAuditSink>,
    builder: CatalogBuilder,
    service: CatalogService,
}

impl Fixture {
    fn new(output: TracingMemoryBackend) -> Self {
        let output = Arc::new(output);
        let catalog = Arc::new(TracingMemoryBackend::new());
        let control = Arc::new(TracingMemoryBackend::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let authorizer = Authorizer::new(catalog_role(), audit.clone());
        let output_dyn: Arc<dyn StorageBackend> = output.clone();
        let scanner = OutputScanner::new(GuardedStore::new("out", output_dyn, authorizer.clone()), "tbl_");
        let service = CatalogService::new(catalog.clone(), ArnScope::new("r", "1"), authorizer);
        let builder = CatalogBuilder::new(scanner, service.clone(), "lake_db");
        Self {
            output,
            catalog,
            control,
            audit,
            builder,
            service,
        }
    }

    async fn write(&self, key: &str, rows: usize) {
        self.output
            .put(key, parquet_bytes(&signal_batch(1, rows)), WritePrecondition::None)
            .await
            .expect("write parquet");
    }

    fn runner(&self, timeout: Duration) -> CatalogJobRunner {
        let job = CatalogJobDefinition::new(
            "create-catalog-from-output",
            "lake_db",
            "arn:identity::1:role/catalog-service-role",
            timeout,
        )
        .with_trigger(TriggerBinding::on_demand("manual"))
        .with_trigger(TriggerBinding::scheduled("daily", "cron(0 12 * * ? *)", "UTC", true))
        .with_trigger(TriggerBinding::scheduled("noon-berlin", "cron(0 12 * * ? *)", "Europe/Berlin", true));
        CatalogJobRunner::new(
            job,
            Arc::new(self.builder.clone()),
            self.control.clone(),
            Authorizer::new(catalog_role(), self.audit.clone()),
            &ArnScope::new("r", "1"),
        )
        .expect("runner")
    }
}

#[tokio::test]
async fn build_reflects_the_output_zone() {
    init_test_logging();
    let fx = Fixture::new(TracingMemoryBackend::new());
    fx.write("signals/partition=session-001/session-001.parquet", 2).await;
    fx.write("signals/partition=session-002/session-002.parquet", 3).await;
    fx.write("3B912722/CAN2_gnssspeed/2024/03/01/00000001.parquet", 1).await;
    fx.output.clear_operations();

    let summary = fx.builder.run().await.expect("build");
    assert_eq!(summary.tables, 2);
    assert_eq!(summary.partitions, 3);
    assert_eq!(summary.publish, "created");

    let signals = fx.service.get_table("lake_db", "tbl_signals").await.expect("table");
    assert_eq!(signals.location, "s3://out/signals/");
    assert_eq!(signals.table_type, "EXTERNAL_TABLE");
    assert_eq!(
        signals.columns.iter().map(|c| c.data_type.as_str()).collect::<Vec<_>>(),
        vec!["bigint", "string", "double"]
    );
    assert_eq!(signals.partition_keys, vec![Column::new("partition", "string")]);
    assert_eq!(signals.parameters["classification"], "parquet");

    let dated = fx
        .service
        .get_table("lake_db", "tbl_3b912722_can2_gnssspeed")
        .await
        .expect("dated table");
    assert_eq!(dated.partition_keys, vec![Column::new("date_created", "string")]);
    assert_eq!(dated.parameters["projection.date_created.format"], "yyyy/MM/dd");
    assert_eq!(
        dated.parameters["storage.location.template"],
        "s3://out/3B912722/CAN2_gnssspeed/${date_created}/"
    );

    // The builder never writes to the zone it catalogs.
    assert!(!fx.output.was_mutated());
}

#[tokio::test]
async fn rebuilding_unchanged_output_is_a_no_op() {
    let fx = Fixture::new(TracingMemoryBackend::new());
    fx.write("signals/partition=a/a.parquet", 1).await;

    fx.builder.run().await.expect("first");
    let before = fx.catalog.paths();
    let version = fx.catalog.version(&before[0]);

    let again = fx.builder.run().await.expect("second");
    assert_eq!(again.publish, "unchanged");
    assert_eq!(fx.catalog.paths(), before);
    assert_eq!(fx.catalog.version(&before[0]), version);

    fx.write("signals/partition=b/b.parquet", 1).await;
    assert_eq!(fx.builder.run().await.expect("third").publish, "updated");
    assert_eq!(
        fx.service
            .get_partitions("lake_db", "tbl_signals")
            .await
            .expect("partitions")
            .len(),
        2
    );
}

#[tokio::test]
async fn failed_build_leaves_catalog_untouched() {
    let fx = Fixture::new(TracingMemoryBackend::new());
    fx.write("signals/partition=a/a.parquet", 1).await;
    fx.builder.run().await.expect("first");
    fx.catalog.clear_operations();

    fx.output
        .put(
            "broken/partition=x/x.parquet",
            bytes::Bytes::from_static(b"not parquet"),
            WritePrecondition::None,
        )
        .await
        .expect("write");
    let err = fx.builder.run().await.expect_err("schema error");
    assert!(matches!(err, Error::Schema { .. }));
    assert!(!fx.catalog.was_mutated());
}

#[tokio::test(start_paused = true)]
async fn two_scheduled_triggers_during_a_long_run_start_one_run() {
    // Every output-zone call takes five minutes, so a build spans ten.
    let fx = Fixture::new(TracingMemoryBackend::with_latency(Duration::from_secs(300)));
    fx.write("signals/partition=a/a.parquet", 1).await;
    let runner = fx.runner(Duration::from_secs(48 * 3600));

    let first = runner.fire("daily").await.expect("fire").into_handle().expect("started");
    tokio::time::advance(Duration::from_secs(1)).await;
    let second = runner.fire("noon-berlin").await.expect("fire");
    assert!(matches!(second, TriggerOutcome::Skipped { .. }));

    let run = first.wait().await.expect("run");
    assert!(matches!(run.status, RunStatus::Succeeded { .. }));
    assert_eq!(runner.runs().await.expect("runs").len(), 1);
    assert_eq!(fx.audit.with_action(AuditAction::CatalogRunSkipped).len(), 1);
}
