//! The provisioned pipeline.
//!
//! [`Pipeline::provision`] plans a deployment, publishes its registry
//! outputs and wires every component to its identity and zones. The
//! result exposes the three entry points the outside world drives:
//! object-created events, timer ticks and query consumers.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use strata_catalog::builder::CatalogBuilder;
use strata_catalog::job::{CatalogJobDefinition, TriggerBinding};
use strata_catalog::runner::{CatalogJobRunner, TimerOutcome, TriggerOutcome};
use strata_catalog::scanner::OutputScanner;
use strata_catalog::service::CatalogService;
use strata_core::arn;
use strata_core::audit::{emit_with, AuditAction, AuditEvent, AuditSink};
use strata_core::config::PipelineConfig;
use strata_core::guarded::{Authorizer, GuardedStore};
use strata_core::naming::{global_name, keys};
use strata_core::registry::ParameterRegistry;
use strata_core::storage::{MemoryBackend, StorageBackend};
use strata_ingest::event::{parse_notification, ObjectCreatedEvent};
use strata_ingest::filter::{RoutingDecision, TriggerFilter};
use strata_ingest::invoker::{Dispatch, TransformFunction, TransformInvoker};
use strata_ingest::ledger::InvocationLedger;
use strata_ingest::lifecycle::{LifecycleRule, LifecycleSweeper};
use strata_ingest::transform::Transformation;
use strata_query::boundary::{AccessBoundary, AccessGrant};
use strata_query::gateway::{GatewayLimits, GatewayStores, QueryGateway};
use strata_query::workgroup::Workgroup;

use crate::error::{Error, Result};
use crate::plan::DeploymentPlan;
use crate::policies::{boundary_scope, PipelineIdentities};

/// Backends of the five stores a deployment uses.
#[derive(Clone)]
pub struct PipelineBackends {
    /// Landing zone.
    pub landing: Arc<dyn StorageBackend>,
    /// Output zone.
    pub output: Arc<dyn StorageBackend>,
    /// Query results zone.
    pub results: Arc<dyn StorageBackend>,
    /// Catalog documents.
    pub catalog: Arc<dyn StorageBackend>,
    /// Invocation ledger, job locks, run records and trigger state.
    pub control: Arc<dyn StorageBackend>,
}

impl PipelineBackends {
    /// Fresh in-memory backends.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            landing: Arc::new(MemoryBackend::new()),
            output: Arc::new(MemoryBackend::new()),
            results: Arc::new(MemoryBackend::new()),
            catalog: Arc::new(MemoryBackend::new()),
            control: Arc::new(MemoryBackend::new()),
        }
    }
}

impl std::fmt::Debug for PipelineBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBackends").finish_non_exhaustive()
    }
}

/// Every component of one deployment, wired together.
pub struct Pipeline {
    plan: DeploymentPlan,
    identities: PipelineIdentities,
    filter: TriggerFilter,
    invoker: TransformInvoker,
    catalog: CatalogService,
    runner: CatalogJobRunner,
    gateway: QueryGateway,
    boundary: AccessBoundary,
    sweeper: Option<LifecycleSweeper>,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stage", &self.plan.context().stage)
            .field("zones", self.plan.zones())
            .field("database", &self.plan.database())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Plans, publishes and wires a deployment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid configuration, or the
    /// registry error if outputs cannot be published.
    pub fn provision(
        config: &PipelineConfig,
        backends: PipelineBackends,
        transformation: Arc<dyn Transformation>,
        registry: &dyn ParameterRegistry,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let plan = DeploymentPlan::build(config)?;
        let published = plan.publish(registry)?;

        let ctx = plan.context().clone();
        let zones = plan.zones().clone();
        let scope = ctx.arn_scope();
        let identities = PipelineIdentities::for_context(&ctx, &zones);

        let filter = TriggerFilter::from_suffixes(config.accepted_suffixes.iter().cloned())?;
        let transform = Authorizer::new(Arc::clone(&identities.transform), Arc::clone(&audit));
        let function_name = global_name(&ctx, keys::TRANSFORM_FUNCTION);
        let invoker = TransformInvoker::new(
            TransformFunction::new(
                function_name.clone(),
                scope.function(&function_name),
                transformation,
            ),
            InvocationLedger::new(Arc::clone(&backends.control)),
            Authorizer::new(Arc::clone(&identities.notifier), Arc::clone(&audit)),
            GuardedStore::new(&zones.landing, Arc::clone(&backends.landing), transform.clone()),
            GuardedStore::new(&zones.output, Arc::clone(&backends.output), transform),
        );

        let catalog_role = Authorizer::new(Arc::clone(&identities.catalog), Arc::clone(&audit));
        let catalog = CatalogService::new(
            Arc::clone(&backends.catalog),
            scope.clone(),
            catalog_role.clone(),
        );
        let scanner = OutputScanner::new(
            GuardedStore::new(&zones.output, Arc::clone(&backends.output), catalog_role.clone()),
            config.catalog_table_prefix.clone(),
        );
        let builder = CatalogBuilder::new(scanner, catalog.clone(), plan.database())
            .with_description(format!("Parquet tables of {}", zones.output));
        let job = CatalogJobDefinition::new(
            global_name(&ctx, keys::CATALOG_JOB),
            plan.database(),
            identities.catalog.arn(),
            config.catalog_timeout,
        )
        .with_trigger(TriggerBinding::on_demand(global_name(
            &ctx,
            keys::CATALOG_TRIGGER_MANUAL,
        )))
        .with_trigger(TriggerBinding::scheduled(
            global_name(&ctx, keys::CATALOG_TRIGGER_SCHEDULED),
            config.catalog_schedule.clone(),
            config.catalog_schedule_timezone.clone(),
            config.catalog_schedule_armed,
        ));
        let runner = CatalogJobRunner::new(
            job,
            Arc::new(builder),
            Arc::clone(&backends.control),
            catalog_role,
            &scope,
        )?;

        let boundary_scope = boundary_scope(&ctx, &zones);
        let workgroup = Workgroup::new(&boundary_scope.workgroup, boundary_scope.results.clone())
            .with_description(format!("Queries over {}", plan.database()));
        let gateway = QueryGateway::new(
            scope,
            [workgroup],
            GatewayStores {
                catalog: catalog.clone(),
                output_bucket: zones.output.clone(),
                output: Arc::clone(&backends.output),
                results: Arc::clone(&backends.results),
            },
            GatewayLimits::from(config),
        )?;
        let boundary = AccessBoundary::new(boundary_scope, Arc::clone(&audit));

        let sweeper = match config.landing_retention_days {
            0 => None,
            days => Some(LifecycleSweeper::new(
                Arc::clone(&backends.landing),
                &zones.landing,
                LifecycleRule::expire_after_days(format!("AutoDeleteAfter{days}Days"), days),
            )?),
        };

        tracing::info!(
            stage = %ctx.stage,
            landing = %zones.landing,
            database = %plan.database(),
            outputs = published.len(),
            "pipeline provisioned"
        );
        Ok(Self {
            plan,
            identities,
            filter,
            invoker,
            catalog,
            runner,
            gateway,
            boundary,
            sweeper,
            audit,
        })
    }

    /// Handles one object-created event.
    ///
    /// Returns `None` when no suffix rule matches; nothing is invoked and
    /// nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownBucket`] for events outside the landing
    /// zone, or the invoker's error.
    pub async fn on_object_created(&self, event: &ObjectCreatedEvent) -> Result<Option<Dispatch>> {
        if event.bucket != self.plan.zones().landing {
            return Err(Error::UnknownBucket(event.bucket.clone()));
        }
        match self.filter.route(event) {
            RoutingDecision::Matched(rule) => Ok(Some(self.invoker.dispatch(event, rule).await?)),
            RoutingDecision::Ignored => Ok(None),
        }
    }

    /// Handles a bucket notification document.
    ///
    /// Every created record is handled on its own and yields one entry: its
    /// dispatch, or the reason it was rejected. Rejected records are logged
    /// and audited, and the records after them are still dispatched.
    /// Records that match no suffix rule yield no entry.
    ///
    /// # Errors
    ///
    /// Returns the parse error if the document itself is malformed.
    pub async fn on_notification(&self, payload: &[u8]) -> Result<Vec<Result<Dispatch>>> {
        let mut outcomes = Vec::new();
        for entry in parse_notification(payload)? {
            let (resource, outcome) = match entry {
                Ok(event) => (
                    arn::storage_object(&event.bucket, &event.key),
                    self.on_object_created(&event).await.transpose(),
                ),
                Err(e) => (
                    arn::storage_bucket(&self.plan.zones().landing),
                    Some(Err(e.into())),
                ),
            };
            match outcome {
                Some(Err(e)) => {
                    tracing::warn!(%resource, error = %e, "rejected notification record");
                    self.audit_rejection(resource, &e).await;
                    outcomes.push(Err(e));
                }
                Some(Ok(dispatch)) => outcomes.push(Ok(dispatch)),
                None => {}
            }
        }
        Ok(outcomes)
    }

    async fn audit_rejection(&self, resource: String, error: &Error) {
        let reason = match error {
            Error::UnknownBucket(_) => "unknown_bucket",
            Error::Ingest(strata_ingest::Error::InvalidEvent { .. }) => "invalid_record",
            e if e.is_access_denied() => "access_denied",
            _ => "dispatch_failed",
        };
        emit_with(
            self.audit.as_ref(),
            AuditEvent::builder()
                .action(AuditAction::EventRejected)
                .actor(self.identities.notifier.actor())
                .resource(resource)
                .decision_reason(reason),
        )
        .await;
    }

    /// Starts a catalog run through the on-demand trigger.
    ///
    /// # Errors
    ///
    /// Returns a permission or control-store error.
    pub async fn start_catalog_run(&self) -> Result<TriggerOutcome> {
        Ok(self.runner.run_now().await?)
    }

    /// Evaluates the scheduled trigger at `now`.
    ///
    /// # Errors
    ///
    /// Returns a permission or control-store error.
    pub async fn on_timer(&self, now: DateTime<Utc>) -> Result<Vec<TimerOutcome>> {
        Ok(self.runner.on_timer(now).await?)
    }

    /// Applies the landing zone's lifecycle rule, returning deleted keys.
    ///
    /// # Errors
    ///
    /// Returns the first storage error.
    pub async fn sweep_landing(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        match &self.sweeper {
            Some(sweeper) => Ok(sweeper.sweep(now).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Issues query access for a consumer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a consumer name that could escape its
    /// results area.
    pub async fn issue_access(&self, consumer: &str) -> Result<AccessGrant> {
        let policy = global_name(self.plan.context(), keys::ACCESS_POLICY);
        Ok(self.boundary.issue(consumer, &policy).await?)
    }

    /// Exchanges an access key pair for an authorizer.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` for an unknown key or a wrong secret.
    pub fn authenticate(&self, access_key_id: &str, secret: &str) -> Result<Authorizer> {
        Ok(self.boundary.authenticate(access_key_id, secret)?)
    }

    /// The deployment plan.
    #[must_use]
    pub fn plan(&self) -> &DeploymentPlan {
        &self.plan
    }

    /// The service identities.
    #[must_use]
    pub fn identities(&self) -> &PipelineIdentities {
        &self.identities
    }

    /// The trigger filter.
    #[must_use]
    pub fn filter(&self) -> &TriggerFilter {
        &self.filter
    }

    /// The transform invoker.
    #[must_use]
    pub fn invoker(&self) -> &TransformInvoker {
        &self.invoker
    }

    /// The catalog, as seen by the catalog role.
    #[must_use]
    pub fn catalog(&self) -> &CatalogService {
        &self.catalog
    }

    /// The catalog job runner.
    #[must_use]
    pub fn runner(&self) -> &CatalogJobRunner {
        &self.runner
    }

    /// The query gateway.
    #[must_use]
    pub fn gateway(&self) -> &QueryGateway {
        &self.gateway
    }

    /// The access boundary.
    #[must_use]
    pub fn boundary(&self) -> &AccessBoundary {
        &self.boundary
    }
}
