//! Use cases exposed by the HTTP API, on top of the repository.

use crate::clock::{Clock, SystemClock};
use crate::datamodel::{Metric, MetricQuery, MetricTags, RecentWindow};
use crate::repository::{MetricIngest, QueryTranslator};
use crate::storage::{StorageError, StorageInstance};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct AnalyticsService {
    translator: QueryTranslator,
    ingest: MetricIngest,
    clock: Arc<dyn Clock>,
}

impl AnalyticsService {
    pub fn new(storage: Arc<dyn StorageInstance>, timeout: Duration) -> Self {
        Self::with_clock(storage, timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(
        storage: Arc<dyn StorageInstance>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            translator: QueryTranslator::new(storage.clone())
                .with_clock(clock.clone())
                .with_timeout(timeout),
            ingest: MetricIngest::new(storage).with_timeout(timeout),
            clock,
        }
    }

    #[instrument(skip(self))]
    pub async fn get_metrics(&self, query: &MetricQuery) -> Result<Vec<Metric>, StorageError> {
        self.translator.compile_and_run(query).await
    }

    #[instrument(skip(self, metric), fields(name = %metric.name))]
    pub async fn record_metric(&self, metric: Metric) -> Result<Metric, StorageError> {
        self.ingest.write(metric).await
    }

    /// Raw points of `name` over the last `hours`.
    #[instrument(skip(self))]
    pub async fn get_recent_metrics(
        &self,
        name: &str,
        hours: u32,
    ) -> Result<Vec<Metric>, StorageError> {
        let window = RecentWindow::hours(hours)?;
        let (start, end) = window.bounds(self.clock.now());
        let query = MetricQuery::for_name(name).between(start, end);
        self.translator.compile_and_run(&query).await
    }

    /// One aggregated value per tag group of `name` over the last `hours`.
    #[instrument(skip(self))]
    pub async fn get_aggregated_metrics(
        &self,
        name: &str,
        aggregation: &str,
        tags: MetricTags,
        hours: u32,
    ) -> Result<Vec<Metric>, StorageError> {
        let window = RecentWindow::hours(hours)?;
        let (start, end) = window.bounds(self.clock.now());
        let mut query = MetricQuery::for_name(name)
            .between(start, end)
            .aggregated_by_name(aggregation)?;
        query.tags = tags;
        self.translator.compile_and_run(&query).await
    }

    #[instrument(skip(self, metric))]
    pub async fn update_metric(&self, id: &str, metric: Metric) -> Result<Metric, StorageError> {
        self.ingest.update(id, metric).await
    }

    #[instrument(skip(self))]
    pub async fn delete_metric(&self, id: &str) -> Result<(), StorageError> {
        self.ingest.delete(id).await
    }
}
