use crate::storage::{DataPoint, FluxRecord, FluxTable, StorageError, StorageInstance};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

pub mod http;

pub const TEST_BUCKET: &str = "metrics-test";

/// In-memory storage recording every call it receives.
///
/// Query answers are scripted with [`RecordingStorage::respond_with`] and
/// consumed in order; when nothing is queued an empty result is returned.
/// Like InfluxDB, a field keeps the type of its first write, and a float
/// written on top of another type is rejected.
#[derive(Debug, Default)]
pub struct RecordingStorage {
    bucket: String,
    delay: Option<Duration>,
    writes: Mutex<Vec<DataPoint>>,
    queries: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<Result<Vec<FluxTable>, StorageError>>>,
    write_failures: Mutex<VecDeque<StorageError>>,
    field_types: Mutex<HashMap<(String, String), &'static str>>,
    unhealthy: Mutex<Option<String>>,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self {
            bucket: TEST_BUCKET.to_string(),
            ..Default::default()
        }
    }

    /// Delays every backend call, to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues the tables returned by the next query.
    pub fn respond_with(&self, tables: Vec<FluxTable>) {
        self.responses.lock().unwrap().push_back(Ok(tables));
    }

    /// Queues an error returned by the next query.
    pub fn fail_next_query(&self, error: StorageError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn fail_next_write(&self, error: StorageError) {
        self.write_failures.lock().unwrap().push_back(error);
    }

    /// Registers `field` of `measurement` as already holding values of
    /// another type, as if a foreign writer had created it.
    pub fn preset_field_type(&self, measurement: &str, field: &str, field_type: &'static str) {
        self.field_types
            .lock()
            .unwrap()
            .insert((measurement.to_string(), field.to_string()), field_type);
    }

    pub fn set_unhealthy(&self, details: &str) {
        *self.unhealthy.lock().unwrap() = Some(details.to_string());
    }

    pub fn writes(&self) -> Vec<DataPoint> {
        self.writes.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn last_query(&self) -> Option<String> {
        self.queries.lock().unwrap().last().cloned()
    }

    /// Recorded writes as InfluxDB returns raw points: one table per series.
    pub fn written_tables(&self) -> Vec<FluxTable> {
        let mut series: BTreeMap<(String, Vec<(String, String)>), Vec<FluxRecord>> =
            BTreeMap::new();
        for point in self.writes.lock().unwrap().iter() {
            let key = (
                point.measurement.clone(),
                point
                    .tags
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            );
            series.entry(key).or_default().push(raw_record(point));
        }
        series
            .into_values()
            .enumerate()
            .map(|(index, mut records)| {
                records.sort_by(|a, b| a.time().cmp(&b.time()));
                for record in records.iter_mut() {
                    record
                        .values
                        .insert("table".to_string(), index.to_string());
                }
                FluxTable {
                    index: index as i64,
                    records,
                }
            })
            .collect()
    }

    async fn simulate_latency(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// A row as found in a raw, unaggregated query result.
pub fn raw_record(point: &DataPoint) -> FluxRecord {
    let mut values = BTreeMap::from([
        ("result".to_string(), "_result".to_string()),
        ("table".to_string(), "0".to_string()),
        ("_measurement".to_string(), point.measurement.clone()),
        ("_field".to_string(), point.field.clone()),
        ("_value".to_string(), point.value.to_string()),
        (
            "_time".to_string(),
            crate::storage::influxdb::flux::time_literal(&point.timestamp),
        ),
    ]);
    values.extend(point.tags.clone());
    FluxRecord::new(values)
}

/// Builds a record from `(column, value)` pairs.
pub fn record(columns: &[(&str, &str)]) -> FluxRecord {
    FluxRecord::new(
        columns
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

#[async_trait]
impl StorageInstance for RecordingStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn write(&self, point: &DataPoint) -> Result<(), StorageError> {
        self.simulate_latency().await;
        if let Some(error) = self.write_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let key = (point.measurement.clone(), point.field.clone());
        let mut field_types = self.field_types.lock().unwrap();
        let existing = field_types.get(&key).copied();
        match existing {
            Some(existing) if existing != "float" => {
                return Err(StorageError::write_error(format!(
                    "failure writing points to database: partial write: field type conflict: \
                     input field \"{}\" on measurement \"{}\" is type float, already exists as type {}",
                    point.field, point.measurement, existing
                )));
            }
            Some(_) => {}
            None => {
                field_types.insert(key, "float");
            }
        }
        drop(field_types);

        self.writes.lock().unwrap().push(point.clone());
        Ok(())
    }

    async fn query(&self, flux: &str) -> Result<Vec<FluxTable>, StorageError> {
        self.simulate_latency().await;
        self.queries.lock().unwrap().push(flux.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        match self.unhealthy.lock().unwrap().as_ref() {
            Some(details) => Err(StorageError::backend_unavailable(details.clone())),
            None => Ok(()),
        }
    }
}
