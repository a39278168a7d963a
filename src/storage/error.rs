use thiserror::Error;

/// Errors surfaced by the metric repository and the storage backends.
///
/// Every variant is a distinct kind so callers (and the HTTP layer) can tell
/// user mistakes apart from backend failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Aggregation name outside of mean, sum, count, min and max.
    #[error("Invalid aggregation '{name}': expected one of mean, sum, count, min, max")]
    InvalidAggregation { name: String },

    /// Malformed query parameters, rejected before reaching the backend.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Malformed metric, rejected before reaching the backend.
    #[error("Invalid metric: {0}")]
    InvalidMetric(String),

    /// The backend could not be reached, or did not answer in time.
    #[error("Backend unavailable: {details}")]
    BackendUnavailable { details: String },

    /// The backend rejected the compiled query.
    #[error("Query rejected by backend: {message}")]
    QueryError { message: String },

    /// The backend rejected the write, for example a field type conflict.
    #[error("Write rejected by backend: {message}")]
    WriteError { message: String },

    /// Point level mutation that an append-only store cannot perform.
    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },
}

impl StorageError {
    pub fn backend_unavailable(details: impl Into<String>) -> Self {
        StorageError::BackendUnavailable {
            details: details.into(),
        }
    }

    pub fn query_error(message: impl Into<String>) -> Self {
        StorageError::QueryError {
            message: message.into(),
        }
    }

    pub fn write_error(message: impl Into<String>) -> Self {
        StorageError::WriteError {
            message: message.into(),
        }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        StorageError::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    /// True for errors caused by the caller's input rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidAggregation { .. }
                | StorageError::InvalidQuery(_)
                | StorageError::InvalidMetric(_)
        )
    }
}
