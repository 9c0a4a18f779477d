//! Resource naming.
//!
//! Every durable resource name is a pure function of the deployment
//! [`Context`] and a stable resource key, so two deployments of the same
//! stage always agree on names and different stages never collide.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::arn::ArnScope;
use crate::config::PipelineConfig;

/// Deployment coordinates that names are derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Application prefix (e.g. `strata`).
    pub app_prefix: String,
    /// Prefix of base tag keys.
    pub tag_prefix: String,
    /// Deployment stage.
    pub stage: String,
    /// Deployment region.
    pub region: String,
    /// Owning account.
    pub account: String,
    /// Whether names embed the region.
    pub multi_region: bool,
}

impl Context {
    /// Region/account scope for resource ARNs.
    #[must_use]
    pub fn arn_scope(&self) -> ArnScope {
        ArnScope::new(&self.region, &self.account)
    }
}

impl From<&PipelineConfig> for Context {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            app_prefix: config.app_prefix.clone(),
            tag_prefix: config.tag_prefix.clone(),
            stage: config.stage.clone(),
            region: config.region.clone(),
            account: config.account.clone(),
            multi_region: config.multi_region,
        }
    }
}

/// Global name of a resource: `{app}[-{region}]-{stage}-{key}`.
///
/// ```rust
/// use strata_core::naming::{global_name, Context};
///
/// let ctx = Context {
///     app_prefix: "strata".into(),
///     tag_prefix: "strata".into(),
///     stage: "dev".into(),
///     region: "eu-west-1".into(),
///     account: "1".into(),
///     multi_region: false,
/// };
/// assert_eq!(global_name(&ctx, "raw-data"), "strata-dev-raw-data");
/// ```
#[must_use]
pub fn global_name(ctx: &Context, key: &str) -> String {
    if ctx.multi_region {
        format!("{}-{}-{}-{key}", ctx.app_prefix, ctx.region, ctx.stage)
    } else {
        format!("{}-{}-{key}", ctx.app_prefix, ctx.stage)
    }
}

/// Namespace of registry parameters: `/{app}[/{region}]/{stage}`.
#[must_use]
pub fn parameter_prefix(ctx: &Context) -> String {
    if ctx.multi_region {
        format!("/{}/{}/{}", ctx.app_prefix, ctx.region, ctx.stage)
    } else {
        format!("/{}/{}", ctx.app_prefix, ctx.stage)
    }
}

/// Registry path of one exported value, optionally grouped by stack.
#[must_use]
pub fn parameter_path(ctx: &Context, stack: Option<&str>, key: &str) -> String {
    match stack {
        Some(stack) => format!("{}/{stack}/{key}", parameter_prefix(ctx)),
        None => format!("{}/{key}", parameter_prefix(ctx)),
    }
}

/// Catalog-safe database name: the global name with `-` replaced by `_`.
#[must_use]
pub fn database_name(ctx: &Context, key: &str) -> String {
    global_name(ctx, key).replace('-', "_")
}

/// Tags every resource carries.
#[must_use]
pub fn base_tags(ctx: &Context) -> BTreeMap<String, String> {
    BTreeMap::from([
        (format!("{}:service", ctx.tag_prefix), ctx.app_prefix.clone()),
        (format!("{}:environment", ctx.tag_prefix), ctx.stage.clone()),
    ])
}

/// Stable resource keys.
pub mod keys {
    /// Landing zone bucket.
    pub const LANDING_BUCKET: &str = "raw-data";
    /// Transform execution identity.
    pub const TRANSFORM_ROLE: &str = "transform-role";
    /// Transform function.
    pub const TRANSFORM_FUNCTION: &str = "transform-fnc";
    /// Catalog builder execution identity.
    pub const CATALOG_ROLE: &str = "catalog-service-role";
    /// Catalog database.
    pub const CATALOG_DATABASE: &str = "parquet-datalake-db";
    /// Catalog builder job.
    pub const CATALOG_JOB: &str = "create-catalog-from-output";
    /// On-demand trigger binding.
    pub const CATALOG_TRIGGER_MANUAL: &str = "catalog-trigger-manual";
    /// Scheduled trigger binding.
    pub const CATALOG_TRIGGER_SCHEDULED: &str = "catalog-trigger-scheduled";
    /// Query gateway workgroup.
    pub const QUERY_WORKGROUP: &str = "query-workgroup";
    /// Access boundary user.
    pub const ACCESS_USER: &str = "query-access-user";
    /// Access boundary policy.
    pub const ACCESS_POLICY: &str = "query-access-policy";
    /// Access boundary key.
    pub const ACCESS_KEY: &str = "query-access-key";
}

/// Names of the three storage zones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneNames {
    /// Landing zone bucket (raw uploads).
    pub landing: String,
    /// Output zone bucket (`{landing}-parquet`).
    pub output: String,
    /// Query results bucket (`{landing}-parquet-query-results`).
    pub results: String,
}

impl ZoneNames {
    /// Derives the zone names for a deployment.
    #[must_use]
    pub fn for_context(ctx: &Context) -> Self {
        let landing = global_name(ctx, keys::LANDING_BUCKET);
        Self {
            output: format!("{landing}-parquet"),
            results: format!("{landing}-parquet-query-results"),
            landing,
        }
    }
}
