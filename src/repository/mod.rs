//! Translation between metrics and the time-series backend.

pub mod metric_ingest;
pub mod query_translator;

pub use metric_ingest::MetricIngest;
pub use query_translator::QueryTranslator;

use crate::storage::StorageError;
use std::future::Future;
use std::time::Duration;

/// Default bound of a single backend call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a backend call, failing with `BackendUnavailable` once `timeout`
/// has elapsed.
pub(crate) async fn with_timeout<T, F>(
    timeout: Duration,
    operation: &str,
    future: F,
) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::backend_unavailable(format!(
            "{} timed out after {:?}",
            operation, timeout
        ))),
    }
}
