use super::{DEFAULT_TIMEOUT, with_timeout};
use crate::clock::{Clock, SystemClock};
use crate::datamodel::{Metric, MetricQuery, MetricTags, TimeRange};
use crate::storage::influxdb::flux;
use crate::storage::{FluxRecord, FluxTable, StorageError, StorageInstance};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Columns of a query result that are bookkeeping, not tags.
const NON_TAG_COLUMNS: [&str; 2] = ["result", "table"];

/// Compiles metric queries into Flux, runs them and reshapes the rows into
/// metrics.
#[derive(Debug, Clone)]
pub struct QueryTranslator {
    storage: Arc<dyn StorageInstance>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl QueryTranslator {
    pub fn new(storage: Arc<dyn StorageInstance>) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validates `query` and returns its Flux text with the range it was
    /// compiled for.
    pub fn compile(&self, query: &MetricQuery) -> Result<(String, TimeRange), StorageError> {
        let range = query.resolve(self.clock.now())?;
        let flux = flux::compile(self.storage.bucket(), query, &range);
        Ok((flux, range))
    }

    pub async fn compile_and_run(&self, query: &MetricQuery) -> Result<Vec<Metric>, StorageError> {
        self.compile_and_run_with_timeout(query, self.timeout).await
    }

    /// Same as [`Self::compile_and_run`], bounded by `timeout` instead of the
    /// configured default.
    pub async fn compile_and_run_with_timeout(
        &self,
        query: &MetricQuery,
        timeout: Duration,
    ) -> Result<Vec<Metric>, StorageError> {
        let (flux, range) = self.compile(query)?;
        let tables = with_timeout(timeout, "query", self.storage.query(&flux)).await?;
        let metrics = reshape(&tables, query, &range)?;
        debug!(
            tables = tables.len(),
            metrics = metrics.len(),
            "query returned"
        );
        Ok(metrics)
    }
}

fn is_tag_column(column: &str) -> bool {
    !column.starts_with('_') && !NON_TAG_COLUMNS.contains(&column)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|datetime| datetime.with_timezone(&Utc))
        .map_err(|e| StorageError::query_error(format!("Invalid _time '{}': {}", raw, e)))
}

fn to_metric(
    record: &FluxRecord,
    query: &MetricQuery,
    range: &TimeRange,
) -> Result<Option<Metric>, StorageError> {
    let Some(raw_value) = record.value() else {
        return Ok(None);
    };
    let value = raw_value
        .parse::<f64>()
        .map_err(|_| StorageError::query_error(format!("Non-numeric _value '{}'", raw_value)))?;

    let name = match (record.measurement(), &query.name) {
        (Some(measurement), _) => measurement.to_string(),
        (None, Some(name)) => name.clone(),
        (None, None) => String::new(),
    };

    // Aggregated rows have no _time
    let timestamp = match record.time() {
        Some(raw) => parse_time(raw)?,
        None => range.end,
    };

    let tags: MetricTags = record
        .values
        .iter()
        .filter(|(column, value)| is_tag_column(column) && !value.is_empty())
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect();

    Ok(Some(
        Metric::new(name, value, tags, timestamp).with_generated_id(),
    ))
}

/// Flattens the result tables into metrics, in backend order.
fn reshape(
    tables: &[FluxTable],
    query: &MetricQuery,
    range: &TimeRange,
) -> Result<Vec<Metric>, StorageError> {
    let mut metrics = Vec::with_capacity(tables.iter().map(|t| t.records.len()).sum());
    for record in tables.iter().flat_map(|table| table.records.iter()) {
        if let Some(metric) = to_metric(record, query, range)? {
            metrics.push(metric);
        }
    }
    Ok(metrics)
}
