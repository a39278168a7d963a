use super::app_error::AppError;
use super::state::HttpServerState;
use crate::datamodel::{DEFAULT_LOOKBACK_HOURS, Metric, MetricQuery, MetricTags};
use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Tags that can be filtered on through query parameters.
const TAG_PARAMS: [&str; 3] = ["host", "region", "unit"];

fn tags_from_params(values: [Option<String>; 3]) -> MetricTags {
    TAG_PARAMS
        .iter()
        .zip(values)
        .filter_map(|(key, value)| {
            value
                .filter(|value| !value.is_empty())
                .map(|value| (key.to_string(), value))
        })
        .collect()
}

fn default_hours() -> u32 {
    DEFAULT_LOOKBACK_HOURS as u32
}

#[derive(Debug, Default, Deserialize)]
pub struct GetMetricsParams {
    pub name: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub aggregation: Option<String>,
    pub tag_host: Option<String>,
    pub tag_region: Option<String>,
    pub tag_unit: Option<String>,
}

impl GetMetricsParams {
    fn into_query(self) -> Result<MetricQuery, AppError> {
        let mut query = MetricQuery {
            name: self.name.filter(|name| !name.is_empty()),
            tags: tags_from_params([self.tag_host, self.tag_region, self.tag_unit]),
            start_time: self.start_time,
            end_time: self.end_time,
            aggregation: None,
        };
        if let Some(aggregation) = self.aggregation.filter(|a| !a.is_empty()) {
            query = query.aggregated_by_name(&aggregation)?;
        }
        Ok(query)
    }
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    #[serde(default = "default_hours")]
    pub hours: u32,
}

#[derive(Debug, Deserialize)]
pub struct AggregatedParams {
    pub aggregation: String,
    #[serde(default = "default_hours")]
    pub hours: u32,
    pub tag_host: Option<String>,
    pub tag_region: Option<String>,
    pub tag_unit: Option<String>,
}

/// Record a metric.
///
/// The metric is written as a single point. An identifier is generated when
/// none is provided, and the timestamp defaults to the ingestion time.
#[utoipa::path(
    post,
    path = "/api/analytics/metrics",
    tag = "Metrics",
    request_body = Metric,
    responses(
        (status = 201, description = "Metric recorded", body = Metric),
        (status = 400, description = "Invalid metric", body = AppError),
        (status = 413, description = "Body over the configured limit", body = AppError),
        (status = 422, description = "Write rejected by the backend", body = AppError),
        (status = 503, description = "Backend unavailable", body = AppError),
    )
)]
pub async fn record_metric(
    State(state): State<HttpServerState>,
    payload: Result<Json<Metric>, JsonRejection>,
) -> Result<(StatusCode, Json<Metric>), AppError> {
    let Json(metric) = payload.map_err(AppError::json_rejection)?;
    let metric = state.analytics.record_metric(metric).await?;
    Ok((StatusCode::CREATED, Json(metric)))
}

/// Query metrics.
///
/// Without time bounds, the last 24 hours are returned. Identifiers of the
/// returned metrics are generated per response.
#[utoipa::path(
    get,
    path = "/api/analytics/metrics",
    tag = "Metrics",
    params(
        ("name" = Option<String>, Query, description = "Exact metric name"),
        ("start_time" = Option<String>, Query, description = "RFC3339 start of the range, inclusive"),
        ("end_time" = Option<String>, Query, description = "RFC3339 end of the range, exclusive. Ignored without start_time"),
        ("aggregation" = Option<String>, Query, description = "One of mean, sum, count, min, max"),
        ("tag_host" = Option<String>, Query, description = "Required value of the host tag"),
        ("tag_region" = Option<String>, Query, description = "Required value of the region tag"),
        ("tag_unit" = Option<String>, Query, description = "Required value of the unit tag"),
    ),
    responses(
        (status = 200, description = "Matching metrics", body = Vec<Metric>),
        (status = 400, description = "Invalid query", body = AppError),
        (status = 502, description = "Query rejected by the backend", body = AppError),
        (status = 503, description = "Backend unavailable", body = AppError),
    )
)]
pub async fn get_metrics(
    State(state): State<HttpServerState>,
    params: Result<Query<GetMetricsParams>, QueryRejection>,
) -> Result<Json<Vec<Metric>>, AppError> {
    let Query(params) = params.map_err(AppError::bad_request)?;
    let query = params.into_query()?;
    let metrics = state.analytics.get_metrics(&query).await?;
    Ok(Json(metrics))
}

/// Raw metrics of the last hours.
#[utoipa::path(
    get,
    path = "/api/analytics/metrics/recent/{name}",
    tag = "Metrics",
    params(
        ("name" = String, Path, description = "Metric name"),
        ("hours" = Option<u32>, Query, description = "Lookback in hours, 24 by default", minimum = 1, maximum = 167),
    ),
    responses(
        (status = 200, description = "Recent metrics", body = Vec<Metric>),
        (status = 400, description = "Invalid hours", body = AppError),
        (status = 503, description = "Backend unavailable", body = AppError),
    )
)]
pub async fn get_recent_metrics(
    State(state): State<HttpServerState>,
    Path(name): Path<String>,
    params: Result<Query<RecentParams>, QueryRejection>,
) -> Result<Json<Vec<Metric>>, AppError> {
    let Query(params) = params.map_err(AppError::bad_request)?;
    let metrics = state
        .analytics
        .get_recent_metrics(&name, params.hours)
        .await?;
    Ok(Json(metrics))
}

/// Aggregated metrics of the last hours, one value per tag group.
#[utoipa::path(
    get,
    path = "/api/analytics/metrics/aggregated/{name}",
    tag = "Metrics",
    params(
        ("name" = String, Path, description = "Metric name"),
        ("aggregation" = String, Query, description = "One of mean, sum, count, min, max"),
        ("hours" = Option<u32>, Query, description = "Lookback in hours, 24 by default", minimum = 1, maximum = 167),
        ("tag_host" = Option<String>, Query, description = "Required value of the host tag"),
        ("tag_region" = Option<String>, Query, description = "Required value of the region tag"),
        ("tag_unit" = Option<String>, Query, description = "Required value of the unit tag"),
    ),
    responses(
        (status = 200, description = "Aggregated metrics", body = Vec<Metric>),
        (status = 400, description = "Invalid aggregation or hours", body = AppError),
        (status = 503, description = "Backend unavailable", body = AppError),
    )
)]
pub async fn get_aggregated_metrics(
    State(state): State<HttpServerState>,
    Path(name): Path<String>,
    params: Result<Query<AggregatedParams>, QueryRejection>,
) -> Result<Json<Vec<Metric>>, AppError> {
    let Query(params) = params.map_err(AppError::bad_request)?;
    let tags = tags_from_params([params.tag_host, params.tag_region, params.tag_unit]);
    let metrics = state
        .analytics
        .get_aggregated_metrics(&name, &params.aggregation, tags, params.hours)
        .await?;
    Ok(Json(metrics))
}

/// Update a metric.
///
/// The time-series store is append-only: the metric is written again under
/// the given identifier, the previous point is kept.
#[utoipa::path(
    put,
    path = "/api/analytics/metrics/{id}",
    tag = "Metrics",
    request_body = Metric,
    params(("id" = String, Path, description = "Metric identifier")),
    responses(
        (status = 200, description = "Metric written", body = Metric),
        (status = 400, description = "Invalid metric", body = AppError),
        (status = 413, description = "Body over the configured limit", body = AppError),
        (status = 503, description = "Backend unavailable", body = AppError),
    )
)]
pub async fn update_metric(
    State(state): State<HttpServerState>,
    Path(id): Path<String>,
    payload: Result<Json<Metric>, JsonRejection>,
) -> Result<Json<Metric>, AppError> {
    let Json(metric) = payload.map_err(AppError::json_rejection)?;
    let metric = state.analytics.update_metric(&id, metric).await?;
    Ok(Json(metric))
}

/// Delete a metric. Not supported by the time-series store.
#[utoipa::path(
    delete,
    path = "/api/analytics/metrics/{id}",
    tag = "Metrics",
    params(("id" = String, Path, description = "Metric identifier")),
    responses(
        (status = 501, description = "Not supported", body = AppError),
    )
)]
pub async fn delete_metric(
    State(state): State<HttpServerState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.analytics.delete_metric(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::Aggregation;
    use crate::storage::StorageError;

    #[test]
    fn test_tags_from_params() {
        let tags = tags_from_params([Some("a".to_string()), None, Some(String::new())]);
        assert_eq!(
            tags,
            MetricTags::from([("host".to_string(), "a".to_string())])
        );
    }

    #[test]
    fn test_into_query() {
        let params = GetMetricsParams {
            name: Some("cpu".to_string()),
            aggregation: Some("sum".to_string()),
            tag_region: Some("eu".to_string()),
            ..Default::default()
        };
        let query = params.into_query().unwrap();
        assert_eq!(query.name.as_deref(), Some("cpu"));
        assert_eq!(query.aggregation, Some(Aggregation::Sum));
        assert_eq!(query.tags.get("region").map(String::as_str), Some("eu"));

        let params = GetMetricsParams {
            aggregation: Some("Mean".to_string()),
            ..Default::default()
        };
        match params.into_query() {
            Err(AppError::InternalServerError(error)) => {
                assert!(matches!(
                    error.downcast_ref::<StorageError>(),
                    Some(StorageError::InvalidAggregation { .. })
                ));
            }
            other => panic!("expected an aggregation error, got {:?}", other),
        }
    }
}
