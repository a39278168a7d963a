//! HTTP testing utilities

use crate::analytics::AnalyticsService;
use crate::clock::Clock;
use crate::http::server::build_app_routes;
use crate::http::state::HttpServerState;
use crate::storage::StorageInstance;
use anyhow::Result;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderMap, Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt; // for `oneshot` and `ready`

/// HTTP test client for making requests to our app
pub struct TestApp {
    app: axum::Router,
}

impl TestApp {
    /// Create a new test app with the provided storage
    pub fn new(storage: Arc<dyn StorageInstance>) -> Self {
        Self::from_state(HttpServerState::new(
            "Analytics Service Test",
            storage,
            Duration::from_secs(5),
        ))
    }

    /// Create a test app whose default time ranges are resolved with `clock`
    pub fn with_clock(storage: Arc<dyn StorageInstance>, clock: Arc<dyn Clock>) -> Self {
        Self::from_state(HttpServerState {
            name: Arc::new("Analytics Service Test".to_string()),
            analytics: Arc::new(AnalyticsService::with_clock(
                storage.clone(),
                Duration::from_secs(5),
                clock,
            )),
            storage,
        })
    }

    fn from_state(state: HttpServerState) -> Self {
        // Use the shared route builder from the main server
        let max_body_layer = DefaultBodyLimit::max(10 * 1024 * 1024); // 10MB for tests
        let app = build_app_routes(state, max_body_layer);
        Self { app }
    }

    async fn send(&self, request: Request<Body>) -> Result<TestResponse> {
        let response = self.app.clone().oneshot(request).await?;
        Ok(TestResponse::new(response).await)
    }

    /// Send a POST request with JSON data
    pub async fn post_json(&self, path: &str, json_data: &str) -> Result<TestResponse> {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(json_data.to_string()))?;
        self.send(request).await
    }

    /// Send a PUT request with JSON data
    pub async fn put_json(&self, path: &str, json_data: &str) -> Result<TestResponse> {
        let request = Request::builder()
            .method("PUT")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(json_data.to_string()))?;
        self.send(request).await
    }

    /// Send a GET request
    pub async fn get(&self, path: &str) -> Result<TestResponse> {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())?;
        self.send(request).await
    }

    /// Send a DELETE request
    pub async fn delete(&self, path: &str) -> Result<TestResponse> {
        let request = Request::builder()
            .method("DELETE")
            .uri(path)
            .body(Body::empty())?;
        self.send(request).await
    }
}

/// Test response wrapper for easier assertions
pub struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl TestResponse {
    async fn new(response: axum::response::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        let body = String::from_utf8_lossy(&body_bytes).to_string();

        Self {
            status,
            headers,
            body,
        }
    }

    /// Get response status
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get response body as string
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Parse response body as JSON
    pub fn json<T>(&self) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_str(&self.body).map_err(Into::into)
    }

    /// Assert status code
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status, expected,
            "Expected status {}, got {}. Body: {}",
            expected, self.status, self.body
        );
        self
    }

    /// Assert response body contains text
    pub fn assert_body_contains(&self, text: &str) -> &Self {
        assert!(
            self.body.contains(text),
            "Expected body to contain '{}', but body was: {}",
            text,
            self.body
        );
        self
    }

    /// Assert content-type header
    pub fn assert_content_type(&self, expected: &str) -> &Self {
        let actual = self
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("<missing>");
        assert_eq!(
            actual, expected,
            "Expected content-type to be '{}', but was '{}'",
            expected, actual
        );
        self
    }
}
