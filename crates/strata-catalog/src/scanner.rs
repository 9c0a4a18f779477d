//! Output-zone scanner.
//!
//! Lists the output zone through the catalog identity and groups parquet
//! keys into tables and partitions. The scanner only reads; it never writes
//! to the zone it scans.

use std::collections::BTreeMap;

use strata_core::guarded::GuardedStore;

use crate::error::Result;
use crate::layout::{classify, table_name, ObjectLayout, PARQUET_SUFFIX};
use crate::model::Column;
use crate::schema::{columns, parquet_schema};

/// A table found in the output zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredTable {
    /// Catalog table name.
    pub name: String,
    /// Table root relative to the bucket, without a trailing slash.
    pub root: String,
    /// Partition column names.
    pub partition_keys: Vec<String>,
    /// Partition values keyed by partition path.
    pub partitions: BTreeMap<String, Vec<String>>,
    /// Key of the file the schema is sampled from (the first one listed).
    pub sample_key: String,
    /// Number of parquet files under the root.
    pub object_count: usize,
    /// Whether the partitions come from `YYYY/MM/DD` directories.
    pub date_partitioned: bool,
}

/// Result of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Tables, sorted by name.
    pub tables: Vec<DiscoveredTable>,
    /// Parquet keys that could not be placed in a table.
    pub skipped: Vec<String>,
}

/// Discovers tables in the output zone.
#[derive(Debug, Clone)]
pub struct OutputScanner {
    output: GuardedStore,
    table_prefix: String,
}

impl OutputScanner {
    /// Creates a scanner over the output zone.
    #[must_use]
    pub fn new(output: GuardedStore, table_prefix: impl Into<String>) -> Self {
        Self {
            output,
            table_prefix: table_prefix.into(),
        }
    }

    /// The scanned zone.
    #[must_use]
    pub fn output(&self) -> &GuardedStore {
        &self.output
    }

    /// Lists the output zone and groups its parquet keys.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` if the identity may not list the zone, or the
    /// storage error.
    pub async fn scan(&self) -> Result<ScanReport> {
        let listed = self.output.list("").await?;

        let mut tables: BTreeMap<String, DiscoveredTable> = BTreeMap::new();
        let mut skipped = Vec::new();
        for meta in listed {
            let Some(layout) = classify(&meta.path) else {
                if meta.path.ends_with(PARQUET_SUFFIX) {
                    tracing::warn!(key = %meta.path, "parquet key outside any table layout");
                    skipped.push(meta.path);
                }
                continue;
            };
            if !self.place(&mut tables, &meta.path, layout) {
                skipped.push(meta.path);
            }
        }

        tracing::debug!(
            tables = tables.len(),
            skipped = skipped.len(),
            "scanned output zone"
        );
        Ok(ScanReport {
            tables: tables.into_values().collect(),
            skipped,
        })
    }

    fn place(
        &self,
        tables: &mut BTreeMap<String, DiscoveredTable>,
        key: &str,
        layout: ObjectLayout,
    ) -> bool {
        let name = table_name(&self.table_prefix, &layout.table_root);
        let date_partitioned = layout.is_date_partitioned();
        let table = tables.entry(name.clone()).or_insert_with(|| DiscoveredTable {
            name,
            root: layout.table_root.clone(),
            partition_keys: layout.partition_keys.clone(),
            partitions: BTreeMap::new(),
            sample_key: key.to_string(),
            object_count: 0,
            date_partitioned,
        });

        if table.root != layout.table_root {
            tracing::warn!(
                key,
                table = %table.name,
                root = %table.root,
                "table name collides with another directory"
            );
            return false;
        }
        if table.partition_keys != layout.partition_keys {
            tracing::warn!(
                key,
                table = %table.name,
                expected = ?table.partition_keys,
                found = ?layout.partition_keys,
                "partition columns differ from the table's"
            );
            return false;
        }

        table.object_count += 1;
        if !layout.partition_path.is_empty() {
            table
                .partitions
                .entry(layout.partition_path)
                .or_insert(layout.partition_values);
        }
        true
    }

    /// Reads a table's sample file and returns its columns.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied`, the storage error, or a schema error if the
    /// sample is not valid parquet.
    pub async fn sample_columns(&self, table: &DiscoveredTable) -> Result<Vec<Column>> {
        let data = self.output.get(&table.sample_key).await?;
        let schema = parquet_schema(&table.sample_key, data)?;
        Ok(columns(&schema))
    }
}
