//! SQL execution over cataloged output-zone data.
//!
//! Each query gets a fresh DataFusion session. Tables are loaded from the
//! catalog through the caller's permissions, their parquet files read
//! through the caller's view of the output zone, and partition values
//! appended as string columns.

use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, FieldRef, Schema, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use arrow_json::ArrayWriter;
use bytes::Bytes;
use datafusion::datasource::MemTable;
use datafusion::prelude::SessionContext;
use datafusion::sql::parser::{DFParser, Statement as DFStatement};
use datafusion::sql::sqlparser::ast::Statement as SqlStatement;
use datafusion::sql::TableReference;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use strata_catalog::layout::PARQUET_SUFFIX;
use strata_catalog::model::CatalogTable;
use strata_catalog::CatalogService;
use strata_core::guarded::GuardedStore;

use crate::error::{Error, Result};

/// Longest accepted SQL text in bytes.
pub const MAX_QUERY_LENGTH: usize = 256 * 1024;

/// Checks that `sql` is exactly one read-only query.
///
/// # Errors
///
/// Returns `InvalidQuery` for empty or oversized text, parse failures,
/// multiple statements, and anything that is not a `SELECT`/CTE.
pub fn validate_query(sql: &str) -> Result<()> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(Error::invalid_query("sql cannot be empty"));
    }
    if sql.len() > MAX_QUERY_LENGTH {
        return Err(Error::invalid_query(format!(
            "sql exceeds max length ({MAX_QUERY_LENGTH} bytes)"
        )));
    }
    let statements = DFParser::parse_sql(sql)
        .map_err(|err| Error::invalid_query(format!("failed to parse SQL: {err}")))?;
    let mut iter = statements.iter();
    let Some(statement) = iter.next() else {
        return Err(Error::invalid_query("sql must contain a statement"));
    };
    if iter.next().is_some() {
        return Err(Error::invalid_query(
            "only single-statement queries are supported",
        ));
    }
    match statement {
        DFStatement::Statement(statement) => match statement.as_ref() {
            SqlStatement::Query(_) => Ok(()),
            _ => Err(Error::invalid_query("only SELECT/CTE queries are supported")),
        },
        _ => Err(Error::invalid_query("only SELECT/CTE queries are supported")),
    }
}

/// Builds a session with every readable table of `database` registered,
/// both qualified (`database.table`) and bare. Database names that are not
/// plain lowercase identifiers are only reachable through bare names.
///
/// Tables without data files are left out.
///
/// # Errors
///
/// Returns the catalog or storage error (including `AccessDenied`) of the
/// first table that cannot be loaded.
pub async fn session_for(
    catalog: &CatalogService,
    output: &GuardedStore,
    database: &str,
) -> Result<SessionContext> {
    let session = SessionContext::new();
    let qualified = is_plain_identifier(database);
    if qualified {
        ensure_schema(&session, database).await?;
    }

    for table in catalog.get_tables(database).await? {
        if !table.location.starts_with(&output.uri("")) {
            tracing::warn!(
                table = %table.name,
                location = %table.location,
                "table is outside the output zone; not registered"
            );
            continue;
        }
        let Some(mem) = load_table(output, &table).await? else {
            tracing::debug!(table = %table.name, "table has no data files");
            continue;
        };
        if qualified {
            session.register_table(
                TableReference::partial(database, table.name.as_str()),
                mem.clone(),
            )?;
        }
        session.register_table(TableReference::bare(table.name.as_str()), mem)?;
    }
    Ok(session)
}

/// Runs a validated query, capped at `max_rows` rows.
///
/// # Errors
///
/// Returns `Execution` with the engine's message.
pub async fn run_sql(
    session: &SessionContext,
    sql: &str,
    max_rows: usize,
) -> Result<Vec<RecordBatch>> {
    let df = session.sql(sql).await?.limit(0, Some(max_rows))?;
    Ok(df.collect().await?)
}

/// Serializes batches as one JSON array of row objects.
///
/// # Errors
///
/// Returns `Execution` if a value cannot be written as JSON.
pub fn batches_to_json(batches: &[RecordBatch]) -> Result<Vec<u8>> {
    let mut writer = ArrayWriter::new(Vec::new());
    let refs: Vec<&RecordBatch> = batches.iter().collect();
    writer
        .write_batches(&refs)
        .map_err(|e| Error::execution(format!("failed to write JSON: {e}")))?;
    writer
        .finish()
        .map_err(|e| Error::execution(format!("failed to finalize JSON: {e}")))?;
    Ok(writer.into_inner())
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

async fn ensure_schema(session: &SessionContext, schema: &str) -> Result<()> {
    let statement = format!("CREATE SCHEMA IF NOT EXISTS {schema}");
    session.sql(&statement).await?.collect().await?;
    Ok(())
}

async fn load_table(output: &GuardedStore, table: &CatalogTable) -> Result<Option<Arc<MemTable>>> {
    let keys: Vec<String> = table.partition_keys.iter().map(|c| c.name.clone()).collect();
    let sources: Vec<(String, Vec<String>)> = if table.is_partitioned() {
        table
            .partitions
            .values()
            .map(|p| (p.key_prefix().to_string(), p.values.clone()))
            .collect()
    } else {
        vec![(table.key_prefix().to_string(), Vec::new())]
    };

    let mut schema: Option<SchemaRef> = None;
    let mut batches = Vec::new();
    for (prefix, values) in sources {
        let partition: Vec<(&str, &str)> = keys
            .iter()
            .map(String::as_str)
            .zip(values.iter().map(String::as_str))
            .collect();
        for meta in output.list(&prefix).await? {
            let Some(file) = meta.path.strip_prefix(prefix.as_str()) else {
                continue;
            };
            if file.contains('/') || file.starts_with('.') || !file.ends_with(PARQUET_SUFFIX) {
                continue;
            }
            let (file_schema, file_batches) = decode_parquet(&meta.path, output.get(&meta.path).await?)?;
            let extended = extend_schema(&file_schema, &keys);
            let expected = schema.get_or_insert_with(|| Arc::clone(&extended));
            if *expected != extended {
                return Err(Error::execution(format!(
                    "{}: {} does not match the table schema",
                    table.name, meta.path
                )));
            }
            for batch in &file_batches {
                batches.push(extend_batch(batch, expected, &partition)?);
            }
        }
    }

    let Some(schema) = schema else {
        return Ok(None);
    };
    Ok(Some(Arc::new(MemTable::try_new(schema, vec![batches])?)))
}

fn decode_parquet(key: &str, bytes: Bytes) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .map_err(|e| Error::execution(format!("failed to read parquet {key}: {e}")))?;
    let reader = builder
        .build()
        .map_err(|e| Error::execution(format!("failed to build parquet reader {key}: {e}")))?;
    let schema = reader.schema();
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::execution(format!("failed to decode parquet {key}: {e}")))?;
    Ok((schema, batches))
}

/// File schema plus one non-null string column per partition key the file
/// does not already carry. Metadata is dropped so files agree.
fn extend_schema(file: &Schema, keys: &[String]) -> SchemaRef {
    let mut fields: Vec<FieldRef> = file.fields().iter().cloned().collect();
    for key in keys {
        if file.column_with_name(key).is_none() {
            fields.push(Arc::new(Field::new(key, DataType::Utf8, false)));
        }
    }
    Arc::new(Schema::new(fields))
}

fn extend_batch(batch: &RecordBatch, schema: &SchemaRef, partition: &[(&str, &str)]) -> Result<RecordBatch> {
    let mut columns = batch.columns().to_vec();
    for (key, value) in partition {
        if batch.schema().column_with_name(key).is_none() {
            let column: ArrayRef = Arc::new(StringArray::from(vec![*value; batch.num_rows()]));
            columns.push(column);
        }
    }
    RecordBatch::try_new(Arc::clone(schema), columns)
        .map_err(|e| Error::execution(format!("failed to attach partition columns: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;

    #[test]
    fn accepts_single_select_and_cte() {
        validate_query("SELECT * FROM t WHERE partition = 'a'").expect("select");
        validate_query("WITH x AS (SELECT 1 AS v) SELECT v FROM x").expect("cte");
    }

    #[test]
    fn rejects_writes_and_multiple_statements() {
        for sql in [
            "",
            "   ",
            "INSERT INTO t VALUES (1)",
            "DROP TABLE t",
            "CREATE TABLE t AS SELECT 1",
            "SELECT 1; SELECT 2",
            "COPY t TO 'out.parquet'",
            "SELEC 1",
        ] {
            assert!(
                matches!(validate_query(sql), Err(Error::InvalidQuery { .. })),
                "{sql:?} accepted"
            );
        }
    }

    #[test]
    fn partition_values_become_string_columns() {
        let file = Schema::new(vec![Field::new("v", DataType::Int64, false)]);
        let keys = vec!["partition".to_string()];
        let schema = extend_schema(&file, &keys);
        let batch = RecordBatch::try_new(
            Arc::new(file),
            vec![Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef],
        )
        .expect("batch");

        let out = extend_batch(&batch, &schema, &[("partition", "session-001")]).expect("extend");
        assert_eq!(out.num_columns(), 2);
        let values = out
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("utf8");
        assert_eq!(values.value(0), "session-001");
        assert_eq!(values.value(1), "session-001");
    }

    #[test]
    fn only_plain_database_names_are_qualified() {
        assert!(is_plain_identifier("strata_dev_parquet_datalake_db"));
        assert!(!is_plain_identifier("Mixed"));
        assert!(!is_plain_identifier("has-dash"));
        assert!(!is_plain_identifier("1db"));
    }

    #[test]
    fn file_columns_win_over_partition_values() {
        let file = Schema::new(vec![Field::new("partition", DataType::Utf8, false)]);
        let schema = extend_schema(&file, &["partition".to_string()]);
        assert_eq!(schema.fields().len(), 1);
    }

    #[test]
    fn json_output_is_an_array_of_rows() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![7])) as ArrayRef])
            .expect("batch");
        let json = batches_to_json(&[batch]).expect("json");
        assert_eq!(String::from_utf8(json).expect("utf8"), r#"[{"v":7}]"#);
    }

    #[tokio::test]
    async fn run_sql_applies_the_row_cap() {
        let session = SessionContext::new();
        let batches = run_sql(&session, "SELECT * FROM (VALUES (1), (2), (3)) AS t(v)", 2)
            .await
            .expect("run");
        assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 2);
    }
}
