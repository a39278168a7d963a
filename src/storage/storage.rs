use super::StorageError;
use crate::datamodel::{Metric, MetricTags};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Name of the single numeric field every metric is written to.
pub const VALUE_FIELD: &str = "value";

/// One point as sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub measurement: String,
    pub field: String,
    pub value: f64,
    pub tags: MetricTags,
    pub timestamp: DateTime<Utc>,
}

impl From<&Metric> for DataPoint {
    fn from(metric: &Metric) -> Self {
        Self {
            measurement: metric.name.clone(),
            field: VALUE_FIELD.to_string(),
            value: metric.value,
            tags: metric.tags.clone(),
            timestamp: metric.timestamp,
        }
    }
}

/// One result row, addressable by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FluxRecord {
    pub values: BTreeMap<String, String>,
}

impl FluxRecord {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    pub fn measurement(&self) -> Option<&str> {
        self.get("_measurement").filter(|s| !s.is_empty())
    }

    pub fn value(&self) -> Option<&str> {
        self.get("_value").filter(|s| !s.is_empty())
    }

    pub fn time(&self) -> Option<&str> {
        self.get("_time").filter(|s| !s.is_empty())
    }
}

/// Rows sharing the same group key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FluxTable {
    pub index: i64,
    pub records: Vec<FluxRecord>,
}

/// Capability interface of the time-series backend.
///
/// Implementations are shared between all requests and must be safe for
/// concurrent use.
#[async_trait]
pub trait StorageInstance: Send + Sync + Debug {
    /// Bucket the queries read from.
    fn bucket(&self) -> &str;

    /// Durably writes a single point.
    async fn write(&self, point: &DataPoint) -> Result<(), StorageError>;

    /// Executes a Flux query and returns the result tables in backend order.
    async fn query(&self, flux: &str) -> Result<Vec<FluxTable>, StorageError>;

    async fn health_check(&self) -> Result<(), StorageError>;
}
