use super::app_error::AppError;
use super::health::{analytics_health, liveness, readiness};
use super::metrics::{
    delete_metric, get_aggregated_metrics, get_metrics, get_recent_metrics, record_metric,
    update_metric,
};
use super::state::HttpServerState;
use crate::config;
use anyhow::Result;
use axum::Json;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::http::header;
use axum::routing::{get, put};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace;
use tower_http::{ServiceBuilderExt, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{Level, error, info};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable as ScalarServable};

#[derive(OpenApi)]
#[openapi(
    tags(
        (name = "Analytics", description = "Analytics service"),
        (name = "Metrics", description = "Metric recording and querying"),
        (name = "Health", description = "Health checks"),
    ),
    paths(
        frontpage,
        crate::http::health::liveness,
        crate::http::health::readiness,
        crate::http::health::analytics_health,
        crate::http::metrics::record_metric,
        crate::http::metrics::get_metrics,
        crate::http::metrics::get_recent_metrics,
        crate::http::metrics::get_aggregated_metrics,
        crate::http::metrics::update_metric,
        crate::http::metrics::delete_metric,
    ),
)]
pub struct ApiDoc;

/// Routes of the service, shared by the server and the tests.
pub fn build_app_routes(state: HttpServerState, max_body_layer: DefaultBodyLimit) -> Router {
    Router::new()
        .route("/", get(frontpage))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        // Health
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/api/analytics/health", get(analytics_health))
        // Metrics
        .route(
            "/api/analytics/metrics",
            get(get_metrics)
                .post(record_metric)
                .layer(max_body_layer.clone()),
        )
        .route(
            "/api/analytics/metrics/recent/{name}",
            get(get_recent_metrics),
        )
        .route(
            "/api/analytics/metrics/aggregated/{name}",
            get(get_aggregated_metrics),
        )
        .route(
            "/api/analytics/metrics/{id}",
            put(update_metric)
                .delete(delete_metric)
                .layer(max_body_layer),
        )
        .with_state(state)
}

pub async fn run_http_server(state: HttpServerState, address: SocketAddr) -> Result<()> {
    let config = config::get()?;
    let max_body_layer = DefaultBodyLimit::max(config.parse_http_body_limit()?);
    let timeout_seconds = config.http_server_timeout_seconds;

    // List of headers that shouldn't be logged
    let sensitive_headers: Arc<[_]> = vec![header::AUTHORIZATION, header::COOKIE].into();

    // Middleware creation
    let middleware = ServiceBuilder::new()
        .sensitive_request_headers(sensitive_headers.clone())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .sensitive_response_headers(sensitive_headers)
        .layer(TimeoutLayer::new(Duration::from_secs(timeout_seconds)))
        .compression()
        .into_inner();

    let app = build_app_routes(state, max_body_layer).layer(middleware);

    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("HTTP server listening on {}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    // Wait for the CTRL+C signal
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => {
            error!("Failed to install the CTRL+C signal handler: {}", err);
            std::future::pending::<()>().await;
        }
    }
}

#[utoipa::path(
    get,
    path = "/",
    tag = "Analytics",
    responses(
        (status = 200, description = "Service name", body = String)
    )
)]
async fn frontpage(State(state): State<HttpServerState>) -> Result<Json<String>, AppError> {
    let name: String = (*state.name).clone();
    Ok(Json(name))
}
