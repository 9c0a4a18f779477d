//! Canonical execution identities.
//!
//! Each pipeline component acts as exactly one identity, and each identity
//! carries one policy document built here. Documents are immutable once
//! built; a deployment that needs different grants builds new identities.

use std::sync::Arc;

use strata_core::arn;
use strata_core::naming::{global_name, keys, parameter_prefix, Context, ZoneNames};
use strata_core::policy::{
    actions, Action, ExecutionIdentity, PolicyDocument, PolicyStatement, PrincipalKind, ResourcePattern,
};
use strata_query::boundary::BoundaryScope;
use strata_query::workgroup::ResultsLocation;

/// Storage actions granting object reads plus listing.
const READ: [Action; 2] = [actions::STORAGE_GET_OBJECT, actions::STORAGE_LIST_BUCKET];

/// Storage actions granting object reads, writes and listing.
const READ_WRITE: [Action; 3] = [
    actions::STORAGE_GET_OBJECT,
    actions::STORAGE_PUT_OBJECT,
    actions::STORAGE_LIST_BUCKET,
];

fn bucket_and_objects(bucket: &str) -> [String; 2] {
    [arn::storage_bucket(bucket), arn::storage_objects(bucket, "")]
}

/// Policy of the transform function's role.
///
/// Runtime plumbing (logs, metrics, network interfaces) is granted on
/// every resource; data access is read on the landing zone and
/// read/write on the output zone.
#[must_use]
pub fn transform_role_policy(ctx: &Context, zones: &ZoneNames) -> PolicyDocument {
    let scope = ctx.arn_scope();
    PolicyDocument::builder(global_name(ctx, &format!("{}-policy", keys::TRANSFORM_ROLE)))
        .statement(PolicyStatement::allow(
            "RuntimePlumbing",
            [
                actions::LOGS_CREATE_LOG_GROUP,
                actions::LOGS_CREATE_LOG_STREAM,
                actions::LOGS_PUT_LOG_EVENTS,
                actions::LOGS_DESCRIBE_LOG_STREAMS,
                actions::METRICS_GET_METRIC_STATISTICS,
                actions::METRICS_LIST_METRICS,
                actions::NETWORK_DESCRIBE_TAGS,
                actions::NETWORK_CREATE_NETWORK_INTERFACE,
                actions::NETWORK_DESCRIBE_NETWORK_INTERFACES,
                actions::NETWORK_DELETE_NETWORK_INTERFACE,
            ],
            [ResourcePattern::any()],
        ))
        .statement(PolicyStatement::allow(
            "InvokeTransform",
            [actions::COMPUTE_INVOKE_FUNCTION],
            [scope.function(&global_name(ctx, keys::TRANSFORM_FUNCTION))],
        ))
        .statement(PolicyStatement::allow(
            "ReadParameters",
            [actions::PARAMETERS_GET_PARAMETER],
            [scope.parameter(&format!("{}/*", parameter_prefix(ctx)))],
        ))
        .statement(PolicyStatement::allow(
            "ReadLanding",
            READ,
            bucket_and_objects(&zones.landing),
        ))
        .statement(PolicyStatement::allow(
            "ReadWriteOutput",
            READ_WRITE,
            bucket_and_objects(&zones.output),
        ))
        .build()
}

/// Policy of the landing zone's notification principal: it may invoke the
/// transform function and nothing else.
#[must_use]
pub fn landing_notification_policy(ctx: &Context) -> PolicyDocument {
    PolicyDocument::builder(global_name(ctx, "landing-notifications"))
        .statement(PolicyStatement::allow(
            "AllowInvokeFromLanding",
            [actions::COMPUTE_INVOKE_FUNCTION],
            [ctx
                .arn_scope()
                .function(&global_name(ctx, keys::TRANSFORM_FUNCTION))],
        ))
        .build()
}

/// Policy of the catalog builder's role.
#[must_use]
pub fn catalog_role_policy(ctx: &Context, zones: &ZoneNames) -> PolicyDocument {
    let scope = ctx.arn_scope();
    PolicyDocument::builder(global_name(ctx, &format!("{}-policy", keys::CATALOG_ROLE)))
        .statement(PolicyStatement::allow(
            "ReadLanding",
            READ,
            bucket_and_objects(&zones.landing),
        ))
        .statement(PolicyStatement::allow(
            "ReadWriteOutput",
            READ_WRITE,
            bucket_and_objects(&zones.output),
        ))
        .statement(PolicyStatement::allow(
            "CatalogMaintenance",
            [
                actions::CATALOG_GET_DATABASE,
                actions::CATALOG_GET_DATABASES,
                actions::CATALOG_CREATE_DATABASE,
                actions::CATALOG_UPDATE_DATABASE,
                actions::CATALOG_GET_TABLE,
                actions::CATALOG_GET_TABLES,
                actions::CATALOG_UPDATE_TABLE,
                actions::CATALOG_GET_PARTITION,
                actions::CATALOG_GET_PARTITIONS,
                actions::CATALOG_BATCH_GET_PARTITION,
                actions::CATALOG_BATCH_CREATE_PARTITION,
            ],
            [
                scope.catalog(),
                scope.catalog_database("*"),
                scope.catalog_table("*", "*"),
            ],
        ))
        .statement(PolicyStatement::allow(
            "StartCatalogJob",
            [actions::CATALOG_START_JOB_RUN],
            [scope.catalog_job(&global_name(ctx, keys::CATALOG_JOB))],
        ))
        .build()
}

/// The access boundary's scope for a deployment: the shared workgroup,
/// results at the root of the results zone.
#[must_use]
pub fn boundary_scope(ctx: &Context, zones: &ZoneNames) -> BoundaryScope {
    BoundaryScope {
        arns: ctx.arn_scope(),
        workgroup: global_name(ctx, keys::QUERY_WORKGROUP),
        results: ResultsLocation::bucket_root(&zones.results),
        output_bucket: zones.output.clone(),
        landing_bucket: zones.landing.clone(),
    }
}

/// The three service identities of a deployment.
#[derive(Debug, Clone)]
pub struct PipelineIdentities {
    /// Transform function role.
    pub transform: Arc<ExecutionIdentity>,
    /// Landing zone notification principal.
    pub notifier: Arc<ExecutionIdentity>,
    /// Catalog builder role.
    pub catalog: Arc<ExecutionIdentity>,
}

impl PipelineIdentities {
    /// Builds every identity with its canonical policy.
    #[must_use]
    pub fn for_context(ctx: &Context, zones: &ZoneNames) -> Self {
        let scope = ctx.arn_scope();
        let role = |key: &str, policy: PolicyDocument| {
            let name = global_name(ctx, key);
            Arc::new(ExecutionIdentity::new(
                name.clone(),
                scope.role(&name),
                PrincipalKind::ServiceRole,
                vec![policy],
            ))
        };
        Self {
            transform: role(keys::TRANSFORM_ROLE, transform_role_policy(ctx, zones)),
            notifier: Arc::new(ExecutionIdentity::new(
                format!("{}-notifications", zones.landing),
                arn::storage_bucket(&zones.landing),
                PrincipalKind::ServiceRole,
                vec![landing_notification_policy(ctx)],
            )),
            catalog: role(keys::CATALOG_ROLE, catalog_role_policy(ctx, zones)),
        }
    }
}

/// Looks up a canonical policy by identity key, as used by `strata policy`.
///
/// Accepts `transform`, `notifier`, `catalog` and `access`; the access
/// policy is rendered for the `consumer` placeholder.
#[must_use]
pub fn policy_for(ctx: &Context, zones: &ZoneNames, identity: &str) -> Option<PolicyDocument> {
    match identity {
        "transform" => Some(transform_role_policy(ctx, zones)),
        "notifier" => Some(landing_notification_policy(ctx)),
        "catalog" => Some(catalog_role_policy(ctx, zones)),
        "access" => Some(
            boundary_scope(ctx, zones).policy(&global_name(ctx, keys::ACCESS_POLICY), "consumer"),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::config::PipelineConfig;

    fn fixtures() -> (Context, ZoneNames) {
        let ctx = Context::from(&PipelineConfig::default());
        let zones = ZoneNames::for_context(&ctx);
        (ctx, zones)
    }

    #[test]
    fn transform_role_reads_landing_and_writes_output_only() {
        let (ctx, zones) = fixtures();
        let ids = PipelineIdentities::for_context(&ctx, &zones);
        let t = &ids.transform;

        let landing_obj = arn::storage_object(&zones.landing, "session-001.MF4");
        let output_obj = arn::storage_object(&zones.output, "signals/x.parquet");
        assert!(t.evaluate(&actions::STORAGE_GET_OBJECT, &landing_obj).is_allowed());
        assert!(!t.evaluate(&actions::STORAGE_PUT_OBJECT, &landing_obj).is_allowed());
        assert!(t.evaluate(&actions::STORAGE_PUT_OBJECT, &output_obj).is_allowed());
        assert!(!t
            .evaluate(
                &actions::STORAGE_GET_OBJECT,
                &arn::storage_object(&zones.results, "a/q.json")
            )
            .is_allowed());
        assert!(t
            .evaluate(&actions::LOGS_PUT_LOG_EVENTS, "arn:logs:eu-west-1:0:group/x")
            .is_allowed());
    }

    #[test]
    fn notifier_may_only_invoke_the_transform_function() {
        let (ctx, zones) = fixtures();
        let ids = PipelineIdentities::for_context(&ctx, &zones);
        let function = ctx.arn_scope().function("strata-dev-transform-fnc");
        assert_eq!(ids.notifier.arn(), "arn:storage:::strata-dev-raw-data");
        assert!(ids
            .notifier
            .evaluate(&actions::COMPUTE_INVOKE_FUNCTION, &function)
            .is_allowed());
        assert!(!ids
            .notifier
            .evaluate(&actions::COMPUTE_INVOKE_FUNCTION, &ctx.arn_scope().function("other"))
            .is_allowed());
    }

    #[test]
    fn catalog_role_maintains_catalog_and_starts_only_its_job() {
        let (ctx, zones) = fixtures();
        let ids = PipelineIdentities::for_context(&ctx, &zones);
        let scope = ctx.arn_scope();
        let c = &ids.catalog;
        assert!(c
            .evaluate(
                &actions::CATALOG_UPDATE_TABLE,
                &scope.catalog_table("strata_dev_parquet_datalake_db", "tbl_signals")
            )
            .is_allowed());
        assert!(c
            .evaluate(
                &actions::CATALOG_START_JOB_RUN,
                &scope.catalog_job("strata-dev-create-catalog-from-output")
            )
            .is_allowed());
        assert!(!c
            .evaluate(&actions::CATALOG_START_JOB_RUN, &scope.catalog_job("other"))
            .is_allowed());
        assert!(!c
            .evaluate(
                &actions::STORAGE_PUT_OBJECT,
                &arn::storage_object(&zones.landing, "x.MF4")
            )
            .is_allowed());
    }

    #[test]
    fn policies_are_looked_up_by_identity_key() {
        let (ctx, zones) = fixtures();
        for key in ["transform", "notifier", "catalog", "access"] {
            assert!(policy_for(&ctx, &zones, key).is_some(), "{key}");
        }
        assert!(policy_for(&ctx, &zones, "root").is_none());
    }
}
