//! Reference transformation used by pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use strata_ingest::error::{Error, Result};
use strata_ingest::transform::{OutputObject, SourceObject, TransformContext, Transformation};

use crate::fixtures::{parquet_bytes, signal_batch};

/// Turns each source object into one parquet file of signal rows.
///
/// Output key: `{table}/partition={stem}/{stem}.parquet`. The number of
/// rows per channel is the source object's byte length, so tests control
/// the output through what they upload. Empty sources fail.
#[derive(Debug)]
pub struct SignalTransformation {
    table: String,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl SignalTransformation {
    /// Writes under the `signals` table directory.
    pub fn new() -> Self {
        Self::for_table("signals")
    }

    /// Writes under a custom table directory.
    pub fn for_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleeps (on the tokio clock) before writing.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times the transformation ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Output key for a source stem.
    pub fn output_key(&self, stem: &str) -> String {
        format!("{}/partition={stem}/{stem}.parquet", self.table)
    }
}

impl Default for SignalTransformation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transformation for SignalTransformation {
    fn name(&self) -> &str {
        "signal-decoder"
    }

    async fn transform(
        &self,
        ctx: &TransformContext,
        source: &SourceObject,
    ) -> Result<Vec<OutputObject>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let raw = ctx.read_source(source).await?;
        if raw.is_empty() {
            return Err(Error::transform(format!("{} is empty", source.key)));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let seed = raw.iter().map(|b| u64::from(*b)).sum::<u64>();
        let batch = signal_batch(seed, raw.len());
        let key = self.output_key(source.stem());
        let written = ctx.write_output(&key, parquet_bytes(&batch)).await?;
        Ok(vec![written])
    }
}
