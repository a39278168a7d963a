use super::{DataPoint, FluxTable, StorageError, StorageInstance};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub mod annotated_csv;
pub mod flux;
pub mod line_protocol;
pub mod precision;

use precision::Precision;

/// Connection settings of an InfluxDB v2 instance.
#[derive(Debug, Clone)]
pub struct InfluxDbSettings {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub precision: Precision,
    pub timeout: Duration,
}

/// Storage backed by the InfluxDB v2 HTTP API.
///
/// The underlying `reqwest::Client` pools its connections and is safe to
/// share between concurrent requests, so a single instance serves the whole
/// process.
pub struct InfluxDbStorage {
    client: Client,
    base_url: Url,
    token: String,
    org: String,
    bucket: String,
    precision: Precision,
}

impl std::fmt::Debug for InfluxDbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxDbStorage")
            .field("base_url", &self.base_url.as_str())
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .field("precision", &self.precision)
            .finish()
    }
}

/// Error body of the InfluxDB API.
#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

fn map_transport_error(error: reqwest::Error) -> StorageError {
    if error.is_timeout() {
        StorageError::backend_unavailable(format!("request timed out: {}", error))
    } else if error.is_connect() {
        StorageError::backend_unavailable(format!("connection failed: {}", error))
    } else {
        StorageError::backend_unavailable(error.to_string())
    }
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) => match serde_json::from_str::<ApiError>(&body) {
            Ok(ApiError {
                code: Some(code),
                message,
            }) => format!("{} ({}): {}", status, code, message),
            Ok(ApiError {
                code: None,
                message,
            }) => format!("{}: {}", status, message),
            Err(_) if body.trim().is_empty() => status.to_string(),
            Err(_) => format!("{}: {}", status, body.trim()),
        },
        Err(error) => format!("{}: unreadable body: {}", status, error),
    }
}

/// Statuses meaning the backend itself is not usable right now.
fn is_unavailable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || status == StatusCode::TOO_MANY_REQUESTS
}

impl InfluxDbStorage {
    pub fn connect(settings: InfluxDbSettings) -> Result<Self> {
        let base_url = Url::parse(&settings.url)
            .with_context(|| format!("Invalid InfluxDB URL: {}", settings.url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Invalid InfluxDB URL: {}", settings.url);
        }
        if settings.bucket.is_empty() {
            anyhow::bail!("InfluxDB bucket must not be empty");
        }

        let client = Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout)
            .build()
            .context("Failed to create InfluxDB HTTP client")?;

        Ok(Self {
            client,
            base_url,
            token: settings.token,
            org: settings.org,
            bucket: settings.bucket,
            precision: settings.precision,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, StorageError> {
        self.base_url.join(path).map_err(|e| {
            StorageError::backend_unavailable(format!("Invalid InfluxDB endpoint {}: {}", path, e))
        })
    }

    fn authorization(&self) -> String {
        format!("Token {}", self.token)
    }
}

#[async_trait]
impl StorageInstance for InfluxDbStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn write(&self, point: &DataPoint) -> Result<(), StorageError> {
        let body = line_protocol::encode_point(point, self.precision)?;
        let mut url = self.endpoint("api/v2/write")?;
        url.query_pairs_mut()
            .append_pair("org", &self.org)
            .append_pair("bucket", &self.bucket)
            .append_pair("precision", self.precision.as_str());

        let response = self
            .client
            .post(url)
            .header(header::AUTHORIZATION, self.authorization())
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            debug!(measurement = %point.measurement, "point written");
            return Ok(());
        }

        let message = error_message(response).await;
        if is_unavailable_status(status) {
            warn!(%status, "InfluxDB write failed: {}", message);
            Err(StorageError::backend_unavailable(message))
        } else {
            Err(StorageError::write_error(message))
        }
    }

    async fn query(&self, flux: &str) -> Result<Vec<FluxTable>, StorageError> {
        let mut url = self.endpoint("api/v2/query")?;
        url.query_pairs_mut().append_pair("org", &self.org);

        let body = json!({
            "query": flux,
            "type": "flux",
            "dialect": {
                "header": true,
                "delimiter": ",",
                "annotations": ["datatype", "group", "default"],
            },
        });

        debug!(query = flux, "executing Flux query");
        let response = self
            .client
            .post(url)
            .header(header::AUTHORIZATION, self.authorization())
            .header(header::ACCEPT, "application/csv")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            return if is_unavailable_status(status) {
                warn!(%status, "InfluxDB query failed: {}", message);
                Err(StorageError::backend_unavailable(message))
            } else {
                Err(StorageError::query_error(message))
            };
        }

        let bytes = response.bytes().await.map_err(map_transport_error)?;
        annotated_csv::parse_tables(bytes.to_vec()).await
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        let url = self.endpoint("health")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_transport_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(StorageError::backend_unavailable(
                error_message(response).await,
            ))
        }
    }
}
