//! Catalog builder: scan the output zone, derive the database, publish it.
//!
//! A run is a full rebuild. Tables whose directories vanished disappear
//! from the catalog; unchanged content is not rewritten.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use strata_core::observability::catalog_span;

use crate::error::Result;
use crate::layout::DATE_PARTITION_KEY;
use crate::metrics::CatalogMetrics;
use crate::model::{
    CatalogDatabase, CatalogPartition, CatalogTable, Column, EXTERNAL_TABLE, PARQUET_INPUT_FORMAT,
    PARQUET_OUTPUT_FORMAT, PARQUET_SERDE,
};
use crate::scanner::{DiscoveredTable, OutputScanner};
use crate::service::{CatalogService, PublishOutcome};

/// First day covered by date-partition projection.
pub const DATE_PROJECTION_START: &str = "2019/01/01";

/// Counts describing one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSummary {
    /// Database that was published.
    pub database: String,
    /// Tables in the published database.
    pub tables: usize,
    /// Partitions across those tables.
    pub partitions: usize,
    /// Parquet keys that fit no table.
    pub skipped_keys: usize,
    /// `created`, `updated` or `unchanged`.
    pub publish: String,
}

/// The work a catalog job run performs.
#[async_trait]
pub trait CatalogWork: Send + Sync + 'static {
    /// Brings the catalog in line with the output zone.
    async fn execute(&self) -> Result<BuildSummary>;
}

/// Builds one catalog database from the output zone.
#[derive(Debug, Clone)]
pub struct CatalogBuilder {
    scanner: OutputScanner,
    service: CatalogService,
    database: String,
    description: String,
}

impl CatalogBuilder {
    /// Creates a builder publishing into `database`.
    #[must_use]
    pub fn new(scanner: OutputScanner, service: CatalogService, database: impl Into<String>) -> Self {
        let database = database.into();
        Self {
            description: format!("Tables over {}", scanner.output().bucket()),
            scanner,
            service,
            database,
        }
    }

    /// Overrides the database description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Target database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Derives the database from the current output zone without publishing.
    ///
    /// # Errors
    ///
    /// Returns the first scan, sampling or permission error. Nothing is
    /// published on error.
    pub async fn snapshot(&self) -> Result<(CatalogDatabase, usize)> {
        let report = self.scanner.scan().await?;
        let mut db = CatalogDatabase::new(&self.database, &self.description);
        for discovered in &report.tables {
            let columns = self.scanner.sample_columns(discovered).await?;
            let table = self.table(discovered, columns);
            db.tables.insert(table.name.clone(), table);
        }
        Ok((db, report.skipped.len()))
    }

    fn table(&self, discovered: &DiscoveredTable, mut columns: Vec<Column>) -> CatalogTable {
        let output = self.scanner.output();
        let location = output.uri(&format!("{}/", discovered.root));

        // Partition columns are not data columns even if a file repeats them.
        columns.retain(|c| !discovered.partition_keys.contains(&c.name));

        let mut parameters = BTreeMap::from([
            ("classification".to_string(), "parquet".to_string()),
            ("typeOfData".to_string(), "file".to_string()),
        ]);
        if !discovered.partition_keys.is_empty() {
            parameters.insert("partition_filtering.enabled".into(), "true".into());
        }
        if discovered.date_partitioned && discovered.partition_keys.len() == 1 {
            let key = DATE_PARTITION_KEY;
            for (name, value) in [
                ("projection.enabled".to_string(), "true".to_string()),
                (format!("projection.{key}.type"), "date".to_string()),
                (format!("projection.{key}.format"), "yyyy/MM/dd".to_string()),
                (
                    format!("projection.{key}.range"),
                    format!("{DATE_PROJECTION_START},NOW"),
                ),
                (format!("projection.{key}.interval"), "1".to_string()),
                (format!("projection.{key}.interval.unit"), "DAYS".to_string()),
                (
                    "storage.location.template".to_string(),
                    format!("{location}${{{key}}}/"),
                ),
            ] {
                parameters.insert(name, value);
            }
        }

        let partitions = discovered
            .partitions
            .iter()
            .map(|(path, values)| {
                (
                    path.clone(),
                    CatalogPartition {
                        values: values.clone(),
                        location: format!("{location}{path}/"),
                    },
                )
            })
            .collect();

        CatalogTable {
            name: discovered.name.clone(),
            location,
            columns,
            partition_keys: discovered
                .partition_keys
                .iter()
                .map(|k| Column::new(k, "string"))
                .collect(),
            table_type: EXTERNAL_TABLE.to_string(),
            input_format: PARQUET_INPUT_FORMAT.to_string(),
            output_format: PARQUET_OUTPUT_FORMAT.to_string(),
            serialization_library: PARQUET_SERDE.to_string(),
            parameters,
            partitions,
        }
    }

    /// Scans, derives and publishes.
    ///
    /// # Errors
    ///
    /// Returns the first error; the stored catalog is untouched in that case.
    pub async fn run(&self) -> Result<BuildSummary> {
        let span = catalog_span("build", &self.database);
        async {
            let (db, skipped_keys) = self.snapshot().await?;
            let outcome = self.service.publish(&db).await?;

            let metrics = CatalogMetrics::new();
            metrics.record_database(&db.name, db.tables.len(), db.partition_count());
            metrics.record_skipped(skipped_keys);
            if let PublishOutcome::Updated { removed_tables, .. } = &outcome {
                if !removed_tables.is_empty() {
                    tracing::info!(removed = ?removed_tables, "tables dropped from catalog");
                }
            }
            tracing::info!(
                tables = db.tables.len(),
                partitions = db.partition_count(),
                skipped_keys,
                publish = outcome.label(),
                "catalog built"
            );

            Ok(BuildSummary {
                database: db.name.clone(),
                tables: db.tables.len(),
                partitions: db.partition_count(),
                skipped_keys,
                publish: outcome.label().to_string(),
            })
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl CatalogWork for CatalogBuilder {
    async fn execute(&self) -> Result<BuildSummary> {
        self.run().await
    }
}
