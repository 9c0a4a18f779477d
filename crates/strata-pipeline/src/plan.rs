//! Deterministic deployment planning.
//!
//! A plan lists every durable resource of one deployment: its derived
//! name, ARN, tags, attached policy, the resources it needs to exist first
//! and the values it exports to the configuration registry. Plans are:
//!
//! - **Deterministic**: the same configuration always yields the same plan
//! - **Ordered**: resources come out in a valid creation order
//! - **Serializable**: `strata plan --json` prints exactly this structure

use std::collections::BTreeMap;

use serde::Serialize;

use strata_catalog::schedule::ScheduleEvaluator;
use strata_core::arn;
use strata_core::config::PipelineConfig;
use strata_core::graph::DependencyGraph;
use strata_core::naming::{base_tags, database_name, global_name, keys, Context, ZoneNames};
use strata_core::policy::PolicyDocument;
use strata_core::registry::{publish_outputs, ParameterRegistry, StackOutput};
use strata_ingest::filter::TriggerFilter;

use crate::error::{Error, Result};
use crate::policies;

/// Registry stack every output is grouped under.
pub const OUTPUT_STACK: &str = "pipeline";

/// What kind of resource a plan entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A storage zone.
    Bucket,
    /// Expiry rule on a bucket.
    LifecycleRule,
    /// A service role.
    Role,
    /// The transform function.
    Function,
    /// Permission for a bucket to invoke a function.
    FunctionPermission,
    /// Object-created notification for one suffix.
    BucketNotification,
    /// Catalog database.
    CatalogDatabase,
    /// Catalog builder job.
    CatalogJob,
    /// Trigger binding of the catalog job.
    CatalogTrigger,
    /// Query workgroup.
    Workgroup,
    /// Access boundary user.
    User,
    /// Managed policy.
    Policy,
    /// Access key of a user.
    AccessKey,
}

impl ResourceKind {
    /// Short label used in text output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::LifecycleRule => "lifecycle-rule",
            Self::Role => "role",
            Self::Function => "function",
            Self::FunctionPermission => "function-permission",
            Self::BucketNotification => "bucket-notification",
            Self::CatalogDatabase => "catalog-database",
            Self::CatalogJob => "catalog-job",
            Self::CatalogTrigger => "catalog-trigger",
            Self::Workgroup => "workgroup",
            Self::User => "user",
            Self::Policy => "policy",
            Self::AccessKey => "access-key",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One resource of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedResource {
    /// Logical key, unique within the plan.
    pub key: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Derived physical name.
    pub name: String,
    /// ARN, for resources the permission layer addresses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    /// Tags, always including the base tags.
    pub tags: BTreeMap<String, String>,
    /// Keys of resources that must exist first.
    pub depends_on: Vec<String>,
    /// Kind-specific settings.
    pub properties: BTreeMap<String, String>,
    /// Policy attached to the resource, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyDocument>,
    /// Values exported to the configuration registry.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<StackOutput>,
}

impl PlannedResource {
    fn new(ctx: &Context, key: &str, kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            kind,
            name: name.into(),
            arn: None,
            tags: base_tags(ctx),
            depends_on: Vec::new(),
            properties: BTreeMap::new(),
            policy: None,
            outputs: Vec::new(),
        }
    }

    fn arn(mut self, arn: String) -> Self {
        self.arn = Some(arn);
        self
    }

    fn after(mut self, keys: &[&str]) -> Self {
        self.depends_on.extend(keys.iter().map(ToString::to_string));
        self
    }

    fn property(mut self, key: &str, value: impl ToString) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    fn with_policy(mut self, policy: PolicyDocument) -> Self {
        self.policy = Some(policy);
        self
    }

    fn export(mut self, key: &str, value: impl Into<String>, description: &str) -> Self {
        self.outputs.push(StackOutput {
            id: format!("{}-{key}", self.key),
            key: key.to_string(),
            value: value.into(),
            description: Some(description.to_string()),
            stack: Some(OUTPUT_STACK.to_string()),
            export: true,
        });
        self
    }
}

/// Every resource of one deployment, in creation order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan {
    context: Context,
    zones: ZoneNames,
    database: String,
    resources: Vec<PlannedResource>,
}

impl DeploymentPlan {
    /// Plans a deployment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the configuration is invalid, the
    /// suffixes overlap, the schedule does not parse, or the declared
    /// dependencies form a cycle.
    pub fn build(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let filter = TriggerFilter::from_suffixes(config.accepted_suffixes.iter().cloned())?;
        ScheduleEvaluator::new(&config.catalog_schedule, &config.catalog_schedule_timezone)?;

        let ctx = Context::from(config);
        let zones = ZoneNames::for_context(&ctx);
        let scope = ctx.arn_scope();
        let database = database_name(&ctx, keys::CATALOG_DATABASE);
        let function_name = global_name(&ctx, keys::TRANSFORM_FUNCTION);
        let job_name = global_name(&ctx, keys::CATALOG_JOB);
        let workgroup = global_name(&ctx, keys::QUERY_WORKGROUP);
        let access_user = global_name(&ctx, keys::ACCESS_USER);
        let boundary = policies::boundary_scope(&ctx, &zones);

        let mut declared = Vec::new();

        declared.push(
            PlannedResource::new(&ctx, "landing-bucket", ResourceKind::Bucket, &zones.landing)
                .arn(arn::storage_bucket(&zones.landing))
                .property("zone", "landing")
                .export("landing-bucket", &zones.landing, "Landing zone bucket"),
        );
        if config.landing_retention_days > 0 {
            let days = config.landing_retention_days;
            declared.push(
                PlannedResource::new(
                    &ctx,
                    "landing-lifecycle",
                    ResourceKind::LifecycleRule,
                    format!("AutoDeleteAfter{days}Days"),
                )
                .after(&["landing-bucket"])
                .property("expirationDays", days),
            );
        }
        declared.push(
            PlannedResource::new(&ctx, "output-bucket", ResourceKind::Bucket, &zones.output)
                .arn(arn::storage_bucket(&zones.output))
                .property("zone", "output")
                .export("output-bucket", &zones.output, "Output zone bucket"),
        );
        declared.push(
            PlannedResource::new(&ctx, "results-bucket", ResourceKind::Bucket, &zones.results)
                .arn(arn::storage_bucket(&zones.results))
                .property("zone", "results")
                .export("results-bucket", &zones.results, "Query results bucket"),
        );

        let transform_role = global_name(&ctx, keys::TRANSFORM_ROLE);
        declared.push(
            PlannedResource::new(&ctx, "transform-role", ResourceKind::Role, &transform_role)
                .arn(scope.role(&transform_role))
                .after(&["landing-bucket", "output-bucket"])
                .with_policy(policies::transform_role_policy(&ctx, &zones)),
        );
        declared.push(
            PlannedResource::new(&ctx, "transform-function", ResourceKind::Function, &function_name)
                .arn(scope.function(&function_name))
                .after(&["transform-role"])
                .property("role", scope.role(&transform_role))
                .export(
                    "transform-function-arn",
                    scope.function(&function_name),
                    "Transform function ARN",
                ),
        );
        declared.push(
            PlannedResource::new(
                &ctx,
                "transform-permission",
                ResourceKind::FunctionPermission,
                format!("{function_name}-landing-invoke"),
            )
            .after(&["transform-function", "landing-bucket"])
            .property("sourceArn", arn::storage_bucket(&zones.landing))
            .with_policy(policies::landing_notification_policy(&ctx)),
        );
        for rule in filter.rules() {
            let key = format!(
                "landing-notification-{}",
                rule.suffix().trim_start_matches('.').to_lowercase()
            );
            declared.push(
                PlannedResource::new(&ctx, &key, ResourceKind::BucketNotification, rule.id())
                    .after(&["landing-bucket", "transform-permission"])
                    .property("event", "ObjectCreated:*")
                    .property("suffix", rule.suffix())
                    .property("destination", scope.function(&function_name)),
            );
        }

        let catalog_role = global_name(&ctx, keys::CATALOG_ROLE);
        declared.push(
            PlannedResource::new(&ctx, "catalog-role", ResourceKind::Role, &catalog_role)
                .arn(scope.role(&catalog_role))
                .after(&["landing-bucket", "output-bucket"])
                .with_policy(policies::catalog_role_policy(&ctx, &zones)),
        );
        declared.push(
            PlannedResource::new(&ctx, "catalog-database", ResourceKind::CatalogDatabase, &database)
                .arn(scope.catalog_database(&database))
                .export("catalog-database", &database, "Catalog database name"),
        );
        declared.push(
            PlannedResource::new(&ctx, "catalog-job", ResourceKind::CatalogJob, &job_name)
                .arn(scope.catalog_job(&job_name))
                .after(&["catalog-role", "catalog-database", "output-bucket"])
                .property("database", &database)
                .property("outputLocation", format!("s3://{}/", zones.output))
                .property("maxConcurrentRuns", 1)
                .property("maxRetries", 0)
                .property("timeoutMinutes", config.catalog_timeout.as_secs() / 60)
                .export("catalog-job", &job_name, "Catalog builder job name"),
        );
        let manual = global_name(&ctx, keys::CATALOG_TRIGGER_MANUAL);
        declared.push(
            PlannedResource::new(&ctx, "catalog-trigger-manual", ResourceKind::CatalogTrigger, &manual)
                .arn(scope.catalog_trigger(&manual))
                .after(&["catalog-job"])
                .property("type", "ON_DEMAND"),
        );
        let scheduled = global_name(&ctx, keys::CATALOG_TRIGGER_SCHEDULED);
        declared.push(
            PlannedResource::new(
                &ctx,
                "catalog-trigger-scheduled",
                ResourceKind::CatalogTrigger,
                &scheduled,
            )
            .arn(scope.catalog_trigger(&scheduled))
            .after(&["catalog-job"])
            .property("type", "SCHEDULED")
            .property("schedule", &config.catalog_schedule)
            .property("timezone", &config.catalog_schedule_timezone)
            .property("startOnCreation", config.catalog_schedule_armed),
        );

        declared.push(
            PlannedResource::new(&ctx, "query-workgroup", ResourceKind::Workgroup, &workgroup)
                .arn(scope.query_workgroup(&workgroup))
                .after(&["results-bucket"])
                .property("state", "ENABLED")
                .property("enforceConfiguration", true)
                .property("outputLocation", &boundary.results)
                .export("query-workgroup", &workgroup, "Query workgroup name"),
        );
        declared.push(
            PlannedResource::new(&ctx, "access-user", ResourceKind::User, &access_user)
                .arn(scope.user(&access_user))
                .export("access-user", &access_user, "Query access user name"),
        );
        let access_policy = global_name(&ctx, keys::ACCESS_POLICY);
        declared.push(
            PlannedResource::new(&ctx, "access-policy", ResourceKind::Policy, &access_policy)
                .arn(scope.policy(&access_policy))
                .after(&[
                    "access-user",
                    "query-workgroup",
                    "results-bucket",
                    "output-bucket",
                    "catalog-database",
                ])
                .with_policy(boundary.policy(&access_policy, &access_user)),
        );
        declared.push(
            PlannedResource::new(
                &ctx,
                "access-key",
                ResourceKind::AccessKey,
                global_name(&ctx, keys::ACCESS_KEY),
            )
            .after(&["access-user", "access-policy"]),
        );

        let resources = resolve(declared)?;
        tracing::debug!(
            stage = %ctx.stage,
            resources = resources.len(),
            "deployment planned"
        );
        Ok(Self {
            context: ctx,
            zones,
            database,
            resources,
        })
    }

    /// Resources in creation order.
    #[must_use]
    pub fn resources(&self) -> &[PlannedResource] {
        &self.resources
    }

    /// Looks up a resource by key.
    #[must_use]
    pub fn resource(&self, key: &str) -> Option<&PlannedResource> {
        self.resources.iter().find(|r| r.key == key)
    }

    /// The naming context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The zone bucket names.
    #[must_use]
    pub fn zones(&self) -> &ZoneNames {
        &self.zones
    }

    /// The catalog database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Every registry output, in creation order.
    pub fn outputs(&self) -> impl Iterator<Item = &StackOutput> {
        self.resources.iter().flat_map(|r| r.outputs.iter())
    }

    /// Publishes every output to the registry, returning the paths written.
    ///
    /// # Errors
    ///
    /// Returns the first registry error.
    pub fn publish(&self, registry: &dyn ParameterRegistry) -> Result<Vec<String>> {
        let outputs: Vec<StackOutput> = self.outputs().cloned().collect();
        Ok(publish_outputs(registry, &self.context, &outputs)?)
    }
}

fn resolve(declared: Vec<PlannedResource>) -> Result<Vec<PlannedResource>> {
    let mut graph = DependencyGraph::new();
    let mut by_key = BTreeMap::new();
    for resource in &declared {
        if by_key.insert(resource.key.clone(), resource.clone()).is_some() {
            return Err(Error::DuplicateResource(resource.key.clone()));
        }
        graph.add(resource.key.clone());
    }
    for resource in &declared {
        for dependency in &resource.depends_on {
            graph.depends_on(&resource.key, dependency)?;
        }
    }
    Ok(graph
        .resolve()?
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::registry::MemoryParameterRegistry;

    fn plan() -> DeploymentPlan {
        DeploymentPlan::build(&PipelineConfig::default()).expect("plan")
    }

    fn position(plan: &DeploymentPlan, key: &str) -> usize {
        plan.resources()
            .iter()
            .position(|r| r.key == key)
            .unwrap_or_else(|| panic!("{key} not planned"))
    }

    #[test]
    fn every_dependency_is_created_first() {
        let plan = plan();
        for resource in plan.resources() {
            for dependency in &resource.depends_on {
                assert!(
                    position(&plan, dependency) < position(&plan, &resource.key),
                    "{dependency} must precede {}",
                    resource.key
                );
            }
        }
    }

    #[test]
    fn names_derive_from_the_context() {
        let plan = plan();
        assert_eq!(plan.zones().landing, "strata-dev-raw-data");
        assert_eq!(plan.database(), "strata_dev_parquet_datalake_db");
        let job = plan.resource("catalog-job").expect("job");
        assert_eq!(job.name, "strata-dev-create-catalog-from-output");
        assert_eq!(job.properties["maxConcurrentRuns"], "1");
        assert_eq!(job.properties["timeoutMinutes"], "2880");
        assert_eq!(
            job.tags.get("strata:environment").map(String::as_str),
            Some("dev")
        );
    }

    #[test]
    fn one_notification_per_accepted_suffix() {
        let plan = plan();
        let suffixes: Vec<&str> = plan
            .resources()
            .iter()
            .filter(|r| r.kind == ResourceKind::BucketNotification)
            .map(|r| r.properties["suffix"].as_str())
            .collect();
        assert_eq!(suffixes, vec![".MF4", ".MFC", ".MFE", ".MFM"]);
    }

    #[test]
    fn scheduled_trigger_starts_disarmed_by_default() {
        let plan = plan();
        let scheduled = plan.resource("catalog-trigger-scheduled").expect("trigger");
        assert_eq!(scheduled.properties["startOnCreation"], "false");
        assert_eq!(scheduled.properties["schedule"], "cron(0 12 * * ? *)");
    }

    #[test]
    fn zero_retention_plans_no_lifecycle_rule() {
        let config = PipelineConfig {
            landing_retention_days: 0,
            ..PipelineConfig::default()
        };
        let plan = DeploymentPlan::build(&config).expect("plan");
        assert!(plan.resource("landing-lifecycle").is_none());
    }

    #[test]
    fn invalid_schedules_are_rejected_at_planning() {
        let config = PipelineConfig {
            catalog_schedule: "every noon".into(),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            DeploymentPlan::build(&config),
            Err(Error::Catalog(_))
        ));
    }

    #[test]
    fn plans_are_deterministic() {
        let a = serde_json::to_string(&plan()).expect("encode");
        let b = serde_json::to_string(&plan()).expect("encode");
        assert_eq!(a, b);
    }

    #[test]
    fn outputs_are_published_under_the_stack_prefix() {
        let registry = MemoryParameterRegistry::new();
        let paths = plan().publish(&registry).expect("publish");
        assert!(paths.contains(&"/strata/dev/pipeline/catalog-job".to_string()));
        let job = registry
            .get("/strata/dev/pipeline/catalog-job")
            .expect("published");
        assert_eq!(job.value, "strata-dev-create-catalog-from-output");
        assert_eq!(
            registry.list("/strata/dev/pipeline/").expect("list").len(),
            paths.len()
        );
    }
}
