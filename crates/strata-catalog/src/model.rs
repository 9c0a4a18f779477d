//! Catalog entries: databases, tables and partitions.
//!
//! Everything is keyed by `BTreeMap` so two builds over the same output zone
//! serialize byte-for-byte identically. Idempotent publishing relies on that.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Table type of every cataloged table. The data stays in the output zone.
pub const EXTERNAL_TABLE: &str = "EXTERNAL_TABLE";

/// Input format recorded for parquet tables.
pub const PARQUET_INPUT_FORMAT: &str =
    "org.apache.hadoop.hive.ql.io.parquet.MapredParquetInputFormat";

/// Output format recorded for parquet tables.
pub const PARQUET_OUTPUT_FORMAT: &str =
    "org.apache.hadoop.hive.ql.io.parquet.MapredParquetOutputFormat";

/// Serialization library recorded for parquet tables.
pub const PARQUET_SERDE: &str = "org.apache.hadoop.hive.ql.io.parquet.serde.ParquetHiveSerDe";

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Hive type string (`string`, `bigint`, `double`, ...).
    pub data_type: String,
}

impl Column {
    /// Creates a column.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// One partition of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPartition {
    /// Values in the order of the table's partition keys.
    pub values: Vec<String>,
    /// Storage URI of the partition directory, with a trailing slash.
    pub location: String,
}

/// A table over one directory of the output zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogTable {
    /// Table name.
    pub name: String,
    /// Storage URI of the table root, with a trailing slash.
    pub location: String,
    /// Data columns, sampled from one file.
    pub columns: Vec<Column>,
    /// Partition columns, all typed `string`.
    pub partition_keys: Vec<Column>,
    /// Always [`EXTERNAL_TABLE`].
    pub table_type: String,
    /// Hadoop input format.
    pub input_format: String,
    /// Hadoop output format.
    pub output_format: String,
    /// Serialization library.
    pub serialization_library: String,
    /// Table parameters (classification, projection settings).
    pub parameters: BTreeMap<String, String>,
    /// Partitions keyed by their path relative to the table root.
    pub partitions: BTreeMap<String, CatalogPartition>,
}

impl CatalogTable {
    /// Returns true if the table has partition keys.
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        !self.partition_keys.is_empty()
    }

    /// Finds a partition by its values.
    #[must_use]
    pub fn partition(&self, values: &[String]) -> Option<&CatalogPartition> {
        self.partitions.values().find(|p| p.values == values)
    }

    /// Storage key prefix of the table root inside its bucket.
    ///
    /// `s3://bucket/signals/` gives `signals/`.
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        key_of(&self.location)
    }
}

impl CatalogPartition {
    /// Storage key prefix of the partition inside its bucket.
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        key_of(&self.location)
    }
}

fn key_of(location: &str) -> &str {
    let rest = location.split_once("://").map_or(location, |(_, rest)| rest);
    rest.split_once('/').map_or("", |(_, key)| key)
}

/// A catalog database: the unit the builder publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDatabase {
    /// Database name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Tables keyed by name.
    pub tables: BTreeMap<String, CatalogTable>,
}

impl CatalogDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tables: BTreeMap::new(),
        }
    }

    /// Looks up a table.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&CatalogTable> {
        self.tables.get(name)
    }

    /// Total number of partitions across all tables.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.tables.values().map(|t| t.partitions.len()).sum()
    }
}
