//! Catalog service.
//!
//! Databases live as one JSON document each in the catalog store. Every
//! read and write is checked against the calling identity first, so the
//! builder and query consumers share one code path with different rights.

use std::sync::Arc;

use strata_core::arn::ArnScope;
use strata_core::error::Error as CoreError;
use strata_core::guarded::Authorizer;
use strata_core::policy::actions;
use strata_core::storage::{read_json, write_json, StorageBackend, WritePrecondition, WriteResult};

use crate::error::Result;
use crate::model::{CatalogDatabase, CatalogPartition, CatalogTable};

/// Key prefix of database documents in the catalog store.
pub const DATABASES_PREFIX: &str = "catalog/databases/";

/// What a publish changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The database did not exist and was created.
    Created,
    /// The database existed and differed.
    Updated {
        /// Tables added or changed.
        changed_tables: Vec<String>,
        /// Tables no longer present.
        removed_tables: Vec<String>,
    },
    /// The stored database already matched; nothing was written.
    Unchanged,
}

impl PublishOutcome {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated { .. } => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Permission-checked access to the metadata catalog.
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn StorageBackend>,
    scope: ArnScope,
    authorizer: Authorizer,
}

impl std::fmt::Debug for CatalogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogService")
            .field("scope", &self.scope)
            .field("authorizer", &self.authorizer)
            .finish_non_exhaustive()
    }
}

impl CatalogService {
    /// Creates a service acting as the authorizer's identity.
    #[must_use]
    pub fn new(store: Arc<dyn StorageBackend>, scope: ArnScope, authorizer: Authorizer) -> Self {
        Self {
            store,
            scope,
            authorizer,
        }
    }

    /// The same catalog seen by another identity.
    #[must_use]
    pub fn with_authorizer(&self, authorizer: Authorizer) -> Self {
        Self {
            authorizer,
            ..self.clone()
        }
    }

    /// ARN scope of the catalog.
    #[must_use]
    pub fn scope(&self) -> &ArnScope {
        &self.scope
    }

    fn path(database: &str) -> String {
        format!("{DATABASES_PREFIX}{database}.json")
    }

    async fn load(&self, database: &str) -> Result<Option<(CatalogDatabase, String)>> {
        Ok(read_json(self.store.as_ref(), &Self::path(database)).await?)
    }

    async fn require(&self, database: &str) -> Result<CatalogDatabase> {
        self.load(database)
            .await?
            .map(|(db, _)| db)
            .ok_or_else(|| CoreError::resource_not_found("database", database).into())
    }

    /// Names of all databases, sorted.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` without `catalog:GetDatabases`.
    pub async fn get_databases(&self) -> Result<Vec<String>> {
        self.authorizer
            .authorize(&actions::CATALOG_GET_DATABASES, &self.scope.catalog())
            .await?;
        let mut names: Vec<String> = self
            .store
            .list(DATABASES_PREFIX)
            .await?
            .into_iter()
            .filter_map(|m| {
                m.path
                    .strip_prefix(DATABASES_PREFIX)
                    .and_then(|p| p.strip_suffix(".json"))
                    .map(ToString::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Reads a database with all its tables.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` without `catalog:GetDatabase`, or
    /// `ResourceNotFound`.
    pub async fn get_database(&self, database: &str) -> Result<CatalogDatabase> {
        self.authorizer
            .authorize(
                &actions::CATALOG_GET_DATABASE,
                &self.scope.catalog_database(database),
            )
            .await?;
        self.require(database).await
    }

    /// Lists a database's tables, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` without `catalog:GetTables`, or
    /// `ResourceNotFound`.
    pub async fn get_tables(&self, database: &str) -> Result<Vec<CatalogTable>> {
        self.authorizer
            .authorize(
                &actions::CATALOG_GET_TABLES,
                &self.scope.catalog_database(database),
            )
            .await?;
        Ok(self.require(database).await?.tables.into_values().collect())
    }

    /// Reads one table.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` without `catalog:GetTable`, or
    /// `ResourceNotFound`.
    pub async fn get_table(&self, database: &str, table: &str) -> Result<CatalogTable> {
        self.authorizer
            .authorize(
                &actions::CATALOG_GET_TABLE,
                &self.scope.catalog_table(database, table),
            )
            .await?;
        self.require(database)
            .await?
            .tables
            .remove(table)
            .ok_or_else(|| CoreError::resource_not_found("table", format!("{database}.{table}")).into())
    }

    /// Lists a table's partitions in path order.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` without `catalog:GetPartitions`, or
    /// `ResourceNotFound`.
    pub async fn get_partitions(&self, database: &str, table: &str) -> Result<Vec<CatalogPartition>> {
        self.authorizer
            .authorize(
                &actions::CATALOG_GET_PARTITIONS,
                &self.scope.catalog_table(database, table),
            )
            .await?;
        let db = self.require(database).await?;
        let t = db.table(table).ok_or_else(|| {
            CoreError::resource_not_found("table", format!("{database}.{table}"))
        })?;
        Ok(t.partitions.values().cloned().collect())
    }

    /// Reads one partition by its values.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` without `catalog:GetPartition`, or
    /// `ResourceNotFound`.
    pub async fn get_partition(
        &self,
        database: &str,
        table: &str,
        values: &[String],
    ) -> Result<CatalogPartition> {
        self.authorizer
            .authorize(
                &actions::CATALOG_GET_PARTITION,
                &self.scope.catalog_table(database, table),
            )
            .await?;
        let db = self.require(database).await?;
        db.table(table)
            .and_then(|t| t.partition(values))
            .cloned()
            .ok_or_else(|| {
                CoreError::resource_not_found(
                    "partition",
                    format!("{database}.{table}[{}]", values.join(",")),
                )
                .into()
            })
    }

    /// Reads several partitions at once; unknown values are left out.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` without `catalog:BatchGetPartition`, or
    /// `ResourceNotFound` for the database or table.
    pub async fn batch_get_partition(
        &self,
        database: &str,
        table: &str,
        values: &[Vec<String>],
    ) -> Result<Vec<CatalogPartition>> {
        self.authorizer
            .authorize(
                &actions::CATALOG_BATCH_GET_PARTITION,
                &self.scope.catalog_table(database, table),
            )
            .await?;
        let db = self.require(database).await?;
        let t = db.table(table).ok_or_else(|| {
            CoreError::resource_not_found("table", format!("{database}.{table}"))
        })?;
        Ok(values
            .iter()
            .filter_map(|v| t.partition(v).cloned())
            .collect())
    }

    /// Replaces a database with a freshly built one.
    ///
    /// Publishing the same content twice writes nothing the second time.
    /// Creating needs `catalog:CreateDatabase`; replacing needs
    /// `catalog:UpdateDatabase`. Every added or changed table also needs
    /// `catalog:UpdateTable` and, when it has partitions,
    /// `catalog:BatchCreatePartition`.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied`, `PreconditionFailed` if another writer
    /// replaced the document concurrently, or the storage error.
    pub async fn publish(&self, database: &CatalogDatabase) -> Result<PublishOutcome> {
        let db_arn = self.scope.catalog_database(&database.name);
        let path = Self::path(&database.name);
        let current = self.load(&database.name).await?;

        let (outcome, precondition) = match current {
            Some((existing, _)) if existing == *database => return Ok(PublishOutcome::Unchanged),
            Some((existing, version)) => {
                self.authorizer
                    .authorize(&actions::CATALOG_UPDATE_DATABASE, &db_arn)
                    .await?;
                let changed_tables: Vec<String> = database
                    .tables
                    .iter()
                    .filter(|(name, t)| existing.tables.get(*name) != Some(*t))
                    .map(|(name, _)| name.clone())
                    .collect();
                let removed_tables = existing
                    .tables
                    .keys()
                    .filter(|name| !database.tables.contains_key(*name))
                    .cloned()
                    .collect();
                (
                    PublishOutcome::Updated {
                        changed_tables,
                        removed_tables,
                    },
                    WritePrecondition::MatchesVersion(version),
                )
            }
            None => {
                self.authorizer
                    .authorize(&actions::CATALOG_CREATE_DATABASE, &db_arn)
                    .await?;
                (PublishOutcome::Created, WritePrecondition::DoesNotExist)
            }
        };

        let touched: Vec<&CatalogTable> = match &outcome {
            PublishOutcome::Updated { changed_tables, .. } => changed_tables
                .iter()
                .filter_map(|name| database.tables.get(name))
                .collect(),
            _ => database.tables.values().collect(),
        };
        for table in touched {
            let table_arn = self.scope.catalog_table(&database.name, &table.name);
            self.authorizer
                .authorize(&actions::CATALOG_UPDATE_TABLE, &table_arn)
                .await?;
            if !table.partitions.is_empty() {
                self.authorizer
                    .authorize(&actions::CATALOG_BATCH_CREATE_PARTITION, &table_arn)
                    .await?;
            }
        }

        match write_json(self.store.as_ref(), &path, database, precondition).await? {
            WriteResult::Success { .. } => Ok(outcome),
            WriteResult::PreconditionFailed { current_version } => {
                Err(CoreError::PreconditionFailed {
                    message: format!(
                        "database {} changed concurrently (now at version {current_version})",
                        database.name
                    ),
                }
                .into())
            }
        }
    }
}
