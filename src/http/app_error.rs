use crate::storage::StorageError;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde_json::json;
use tracing::{debug, error, warn};
use utoipa::ToSchema;

// Anyhow error handling with axum
// https://github.com/tokio-rs/axum/blob/d3112a40d55f123bc5e65f995e2068e245f12055/examples/anyhow-error-response/src/main.rs
#[derive(Debug, ToSchema)]
pub enum AppError {
    #[schema(example = "Internal Server Error", value_type = String)]
    InternalServerError(anyhow::Error),
    #[schema(example = "Bad Request", value_type = String)]
    BadRequest(anyhow::Error),
    #[schema(example = "Payload Too Large", value_type = String)]
    PayloadTooLarge(anyhow::Error),
}

/// Status code of each storage error kind.
pub fn storage_error_status(error: &StorageError) -> StatusCode {
    match error {
        StorageError::InvalidAggregation { .. }
        | StorageError::InvalidQuery(_)
        | StorageError::InvalidMetric(_) => StatusCode::BAD_REQUEST,
        StorageError::WriteError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        StorageError::QueryError { .. } => StatusCode::BAD_GATEWAY,
        StorageError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        StorageError::UnsupportedOperation { .. } => StatusCode::NOT_IMPLEMENTED,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::InternalServerError(error) => match error.downcast_ref::<StorageError>() {
                Some(storage_error) => {
                    let status = storage_error_status(storage_error);
                    if storage_error.is_client_error() {
                        debug!(%status, "{}", storage_error);
                    } else if status.is_server_error() {
                        error!(%status, "{}", storage_error);
                    } else {
                        warn!(%status, "{}", storage_error);
                    }
                    (status, storage_error.to_string())
                }
                None => {
                    error!("Internal Server Error: {:?}", error);
                    sentry::integrations::anyhow::capture_anyhow(&error);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal Server Error".to_string(),
                    )
                }
            },
            AppError::BadRequest(error) => (StatusCode::BAD_REQUEST, error.to_string()),
            AppError::PayloadTooLarge(error) => (StatusCode::PAYLOAD_TOO_LARGE, error.to_string()),
        };
        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

impl AppError {
    pub fn bad_request(err: impl Into<anyhow::Error>) -> Self {
        Self::BadRequest(err.into())
    }

    /// Malformed bodies are bad requests, oversized ones keep their 413.
    pub fn json_rejection(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(rejection.into())
        } else {
            Self::bad_request(rejection)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(error: AppError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_storage_errors_statuses() {
        let cases = [
            (
                StorageError::InvalidAggregation {
                    name: "median".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                StorageError::InvalidQuery("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                StorageError::InvalidMetric("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                StorageError::write_error("type conflict"),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (StorageError::query_error("bad flux"), StatusCode::BAD_GATEWAY),
            (
                StorageError::backend_unavailable("refused"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                StorageError::unsupported("delete"),
                StatusCode::NOT_IMPLEMENTED,
            ),
        ];
        for (error, expected) in cases {
            let message = error.to_string();
            let (status, body) = render(AppError::from(error)).await;
            assert_eq!(status, expected);
            assert_eq!(body["error"], message);
        }
    }

    #[tokio::test]
    async fn test_other_errors_are_hidden() {
        let (status, body) = render(AppError::from(anyhow::anyhow!("secret details"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal Server Error");

        let (status, body) = render(AppError::bad_request(anyhow::anyhow!("missing name"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing name");
    }
}
