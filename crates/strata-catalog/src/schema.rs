//! Column inference from a sampled parquet file.

use arrow::datatypes::{DataType, Field, Schema};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::error::{Error, Result};
use crate::model::Column;

/// Reads the arrow schema embedded in a parquet file.
///
/// # Errors
///
/// Returns [`Error::Schema`] if the bytes are not a readable parquet file.
pub fn parquet_schema(key: &str, data: Bytes) -> Result<Schema> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data).map_err(|e| Error::Schema {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    Ok(builder.schema().as_ref().clone())
}

/// Catalog columns for every field of a schema.
#[must_use]
pub fn columns(schema: &Schema) -> Vec<Column> {
    schema
        .fields()
        .iter()
        .map(|f| Column::new(f.name(), hive_type(f.data_type())))
        .collect()
}

/// Hive type string for an arrow type. Unknown types fall back to `string`.
#[must_use]
pub fn hive_type(data_type: &DataType) -> String {
    match data_type {
        DataType::Boolean => "boolean".into(),
        DataType::Int8 => "tinyint".into(),
        DataType::Int16 | DataType::UInt8 => "smallint".into(),
        DataType::Int32 | DataType::UInt16 => "int".into(),
        DataType::Int64 | DataType::UInt32 | DataType::UInt64 => "bigint".into(),
        DataType::Float16 | DataType::Float32 => "float".into(),
        DataType::Float64 => "double".into(),
        DataType::Decimal128(p, s) | DataType::Decimal256(p, s) => format!("decimal({p},{s})"),
        DataType::Date32 | DataType::Date64 => "date".into(),
        DataType::Timestamp(_, _) => "timestamp".into(),
        DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) => {
            "binary".into()
        }
        DataType::List(item) | DataType::LargeList(item) | DataType::FixedSizeList(item, _) => {
            format!("array<{}>", hive_type(item.data_type()))
        }
        DataType::Struct(fields) => {
            let inner: Vec<String> = fields.iter().map(|f| struct_field(f)).collect();
            format!("struct<{}>", inner.join(","))
        }
        DataType::Map(entries, _) => match entries.data_type() {
            DataType::Struct(kv) if kv.len() == 2 => format!(
                "map<{},{}>",
                hive_type(kv[0].data_type()),
                hive_type(kv[1].data_type())
            ),
            _ => "string".into(),
        },
        _ => "string".into(),
    }
}

fn struct_field(field: &Field) -> String {
    format!("{}:{}", field.name(), hive_type(field.data_type()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::TimeUnit;
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;

    #[test]
    fn scalar_types_map_to_hive_names() {
        assert_eq!(hive_type(&DataType::Utf8), "string");
        assert_eq!(hive_type(&DataType::Int64), "bigint");
        assert_eq!(hive_type(&DataType::Float64), "double");
        assert_eq!(hive_type(&DataType::Boolean), "boolean");
        assert_eq!(
            hive_type(&DataType::Timestamp(TimeUnit::Millisecond, None)),
            "timestamp"
        );
        assert_eq!(hive_type(&DataType::Decimal128(10, 2)), "decimal(10,2)");
    }

    #[test]
    fn nested_types_are_spelled_out() {
        let list = DataType::List(Arc::new(Field::new("item", DataType::Int32, true)));
        assert_eq!(hive_type(&list), "array<int>");
        let st = DataType::Struct(
            vec![
                Field::new("a", DataType::Utf8, true),
                Field::new("b", DataType::Float32, true),
            ]
            .into(),
        );
        assert_eq!(hive_type(&st), "struct<a:string,b:float>");
    }

    #[test]
    fn schema_is_sampled_from_parquet_bytes() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("t", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec!["x", "y"])),
            ],
        )
        .expect("batch");
        let mut buffer = Vec::new();
        {
            let mut writer = ArrowWriter::try_new(&mut buffer, schema, None).expect("writer");
            writer.write(&batch).expect("write");
            writer.close().expect("close");
        }

        let sampled = parquet_schema("t/f.parquet", Bytes::from(buffer)).expect("schema");
        assert_eq!(
            columns(&sampled),
            vec![Column::new("t", "bigint"), Column::new("name", "string")]
        );
    }

    #[test]
    fn garbage_is_a_schema_error() {
        let err = parquet_schema("t/f.parquet", Bytes::from_static(b"nope")).expect_err("bad");
        assert!(matches!(err, Error::Schema { ref key, .. } if key == "t/f.parquet"));
    }
}
