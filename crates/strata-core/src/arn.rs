//! Resource names used by the permission layer.
//!
//! Storage resources are global (`arn:storage:::{bucket}/{key}`); every
//! other service is scoped to a region and account through [`ArnScope`].

use serde::{Deserialize, Serialize};

/// ARN of a storage bucket.
#[must_use]
pub fn storage_bucket(bucket: &str) -> String {
    format!("arn:storage:::{bucket}")
}

/// ARN of a single object in a storage bucket.
#[must_use]
pub fn storage_object(bucket: &str, key: &str) -> String {
    format!("arn:storage:::{bucket}/{key}")
}

/// ARN pattern covering every object under `prefix` in a bucket.
///
/// An empty prefix covers the whole bucket.
#[must_use]
pub fn storage_objects(bucket: &str, prefix: &str) -> String {
    format!("arn:storage:::{bucket}/{prefix}*")
}

/// Region and account that scope non-storage resource names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArnScope {
    /// Deployment region (e.g. `eu-west-1`).
    pub region: String,
    /// Owning account identifier.
    pub account: String,
}

impl ArnScope {
    /// Creates a scope for the given region and account.
    #[must_use]
    pub fn new(region: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account: account.into(),
        }
    }

    fn prefix(&self, service: &str) -> String {
        format!("arn:{service}:{}:{}", self.region, self.account)
    }

    /// ARN of the metadata catalog itself.
    #[must_use]
    pub fn catalog(&self) -> String {
        format!("{}:catalog", self.prefix("catalog"))
    }

    /// ARN of a catalog database.
    #[must_use]
    pub fn catalog_database(&self, database: &str) -> String {
        format!("{}:database/{database}", self.prefix("catalog"))
    }

    /// ARN of a catalog table.
    #[must_use]
    pub fn catalog_table(&self, database: &str, table: &str) -> String {
        format!("{}:table/{database}/{table}", self.prefix("catalog"))
    }

    /// ARN of a catalog builder job.
    #[must_use]
    pub fn catalog_job(&self, job: &str) -> String {
        format!("{}:job/{job}", self.prefix("catalog"))
    }

    /// ARN of a catalog job trigger.
    #[must_use]
    pub fn catalog_trigger(&self, trigger: &str) -> String {
        format!("{}:trigger/{trigger}", self.prefix("catalog"))
    }

    /// ARN of a query gateway workgroup.
    #[must_use]
    pub fn query_workgroup(&self, workgroup: &str) -> String {
        format!("{}:workgroup/{workgroup}", self.prefix("query"))
    }

    /// ARN of a transform function.
    #[must_use]
    pub fn function(&self, name: &str) -> String {
        format!("{}:function:{name}", self.prefix("compute"))
    }

    /// ARN of a service role.
    #[must_use]
    pub fn role(&self, name: &str) -> String {
        format!("arn:identity::{}:role/{name}", self.account)
    }

    /// ARN of a user.
    #[must_use]
    pub fn user(&self, name: &str) -> String {
        format!("arn:identity::{}:user/{name}", self.account)
    }

    /// ARN of a managed policy.
    #[must_use]
    pub fn policy(&self, name: &str) -> String {
        format!("arn:identity::{}:policy/{name}", self.account)
    }

    /// ARN of a registry parameter (`path` starts with `/`).
    #[must_use]
    pub fn parameter(&self, path: &str) -> String {
        format!("{}:parameter{path}", self.prefix("parameters"))
    }
}
