//! Pre-built test fixtures.
//!
//! Parquet builders for output-zone data and a configuration for an
//! isolated test stage.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;

use strata_core::config::PipelineConfig;

/// Channels every signal fixture contains, in row order.
pub const SIGNAL_CHANNELS: [&str; 3] = ["EngineSpeed", "VehicleSpeed", "CoolantTemp"];

/// Schema of decoded signal rows.
pub fn signal_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("timestamp_ms", DataType::Int64, false),
        Field::new("channel", DataType::Utf8, false),
        Field::new("value", DataType::Float64, false),
    ]))
}

/// Deterministic signal rows: `rows` samples per channel.
///
/// Values depend on `seed`, so two sessions produce different data.
pub fn signal_batch(seed: u64, rows: usize) -> RecordBatch {
    let mut timestamps = Vec::with_capacity(rows * SIGNAL_CHANNELS.len());
    let mut channels = Vec::with_capacity(rows * SIGNAL_CHANNELS.len());
    let mut values = Vec::with_capacity(rows * SIGNAL_CHANNELS.len());
    for i in 0..rows {
        for (c, channel) in SIGNAL_CHANNELS.iter().enumerate() {
            timestamps.push(i64::try_from(i).expect("row index fits i64") * 10);
            channels.push(*channel);
            #[allow(clippy::cast_precision_loss)]
            values.push((seed as f64) * 100.0 + (c as f64) * 10.0 + i as f64);
        }
    }
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(timestamps)),
        Arc::new(StringArray::from(channels)),
        Arc::new(Float64Array::from(values)),
    ];
    RecordBatch::try_new(signal_schema(), columns).expect("signal batch")
}

/// Encodes a batch as a parquet file.
pub fn parquet_bytes(batch: &RecordBatch) -> Bytes {
    let mut buffer = Vec::new();
    {
        let mut writer =
            ArrowWriter::try_new(&mut buffer, batch.schema(), None).expect("arrow writer");
        writer.write(batch).expect("write batch");
        writer.close().expect("close writer");
    }
    Bytes::from(buffer)
}

/// Configuration for an isolated `test` stage.
///
/// The scheduled catalog trigger starts armed so timer tests exercise it.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        stage: "test".to_string(),
        account: "111122223333".to_string(),
        catalog_schedule_armed: true,
        ..PipelineConfig::default()
    }
}
