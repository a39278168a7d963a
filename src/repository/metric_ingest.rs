use super::{DEFAULT_TIMEOUT, with_timeout};
use crate::datamodel::Metric;
use crate::storage::{DataPoint, StorageError, StorageInstance};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Writes metrics to the backend, one point per metric.
#[derive(Debug, Clone)]
pub struct MetricIngest {
    storage: Arc<dyn StorageInstance>,
    timeout: Duration,
}

impl MetricIngest {
    pub fn new(storage: Arc<dyn StorageInstance>) -> Self {
        Self {
            storage,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validates and writes `metric`, returning it with its identifier.
    pub async fn write(&self, metric: Metric) -> Result<Metric, StorageError> {
        metric.validate().map_err(StorageError::InvalidMetric)?;
        let metric = metric.with_generated_id();

        let point = DataPoint::from(&metric);
        with_timeout(self.timeout, "write", self.storage.write(&point)).await?;
        debug!(name = %metric.name, id = ?metric.id, "metric written");
        Ok(metric)
    }

    /// Writes `metric` again under `id`.
    ///
    /// The store is append-only: the previous point is not replaced, a new one
    /// is recorded at the metric's timestamp.
    pub async fn update(&self, id: &str, mut metric: Metric) -> Result<Metric, StorageError> {
        if id.is_empty() {
            return Err(StorageError::InvalidMetric(
                "metric id must not be empty".to_string(),
            ));
        }
        metric.id = Some(id.to_string());
        info!(id, "update recorded as a new write");
        self.write(metric).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), StorageError> {
        Err(StorageError::unsupported(format!(
            "delete of metric {}: the time-series store is append-only",
            id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::MetricTags;
    use crate::test_utils::RecordingStorage;
    use chrono::{TimeZone, Utc};

    fn cpu_metric() -> Metric {
        Metric::new(
            "cpu",
            75.5,
            MetricTags::from([
                ("host".to_string(), "a".to_string()),
                ("region".to_string(), "us-west".to_string()),
            ]),
            Utc.with_ymd_and_hms(2023, 9, 25, 12, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_write_sends_one_point() {
        let storage = Arc::new(RecordingStorage::new());
        let ingest = MetricIngest::new(storage.clone());

        let written = ingest.write(cpu_metric()).await.unwrap();
        assert!(written.id.is_some());
        assert_eq!(written.name, "cpu");

        let writes = storage.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0], DataPoint::from(&cpu_metric()));
    }

    #[tokio::test]
    async fn test_write_keeps_provided_id() {
        let storage = Arc::new(RecordingStorage::new());
        let ingest = MetricIngest::new(storage);
        let mut metric = cpu_metric();
        metric.id = Some("my-id".to_string());
        assert_eq!(ingest.write(metric).await.unwrap().id.as_deref(), Some("my-id"));
    }

    #[tokio::test]
    async fn test_invalid_metrics_are_not_written() {
        let storage = Arc::new(RecordingStorage::new());
        let ingest = MetricIngest::new(storage.clone());

        let mut reserved = cpu_metric();
        reserved.tags.insert("_measurement".to_string(), "x".to_string());
        let mut unnamed = cpu_metric();
        unnamed.name = String::new();
        let mut infinite = cpu_metric();
        infinite.value = f64::INFINITY;
        let mut injected = cpu_metric();
        injected
            .tags
            .insert("host".to_string(), "a\nevil value=1 1".to_string());
        let mut commented = cpu_metric();
        commented.name = "#cpu".to_string();

        for metric in [reserved, unnamed, infinite, injected, commented] {
            assert!(matches!(
                ingest.write(metric).await,
                Err(StorageError::InvalidMetric(_))
            ));
        }
        assert!(storage.writes().is_empty());
    }

    #[tokio::test]
    async fn test_field_type_conflict_is_a_write_error() {
        let storage = Arc::new(RecordingStorage::new());
        storage.preset_field_type("cpu", "value", "string");
        let ingest = MetricIngest::new(storage);

        let result = ingest.write(cpu_metric()).await;
        match result {
            Err(StorageError::WriteError { message }) => {
                assert!(message.contains("field type conflict"));
            }
            other => panic!("expected WriteError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backend_unavailable() {
        let storage = Arc::new(RecordingStorage::new());
        storage.fail_next_write(StorageError::backend_unavailable("connection refused"));
        let ingest = MetricIngest::new(storage);
        assert_eq!(
            ingest.write(cpu_metric()).await,
            Err(StorageError::backend_unavailable("connection refused"))
        );
    }

    #[tokio::test]
    async fn test_write_timeout() {
        let storage = Arc::new(RecordingStorage::new().with_delay(Duration::from_secs(5)));
        let ingest = MetricIngest::new(storage.clone()).with_timeout(Duration::from_millis(20));
        assert!(matches!(
            ingest.write(cpu_metric()).await,
            Err(StorageError::BackendUnavailable { .. })
        ));
        assert!(storage.writes().is_empty());
    }

    #[tokio::test]
    async fn test_update_is_a_new_write() {
        let storage = Arc::new(RecordingStorage::new());
        let ingest = MetricIngest::new(storage.clone());

        ingest.write(cpu_metric()).await.unwrap();
        let mut changed = cpu_metric();
        changed.value = 90.0;
        changed.id = Some("ignored".to_string());
        let updated = ingest.update("metric-1", changed).await.unwrap();

        assert_eq!(updated.id.as_deref(), Some("metric-1"));
        assert_eq!(updated.value, 90.0);
        assert_eq!(storage.writes().len(), 2);

        assert!(matches!(
            ingest.update("", cpu_metric()).await,
            Err(StorageError::InvalidMetric(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_is_unsupported() {
        let storage = Arc::new(RecordingStorage::new());
        let ingest = MetricIngest::new(storage.clone());
        assert!(matches!(
            ingest.delete("metric-1").await,
            Err(StorageError::UnsupportedOperation { .. })
        ));
        assert!(storage.writes().is_empty());
    }
}
