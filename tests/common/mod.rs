#![allow(dead_code)]

use analytics_service::config::load_configuration_for_tests;
use analytics_service::storage::influxdb::precision::Precision;
use analytics_service::storage::influxdb::{InfluxDbSettings, InfluxDbStorage};
use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;
use uuid::Uuid;

// Ensure configuration is loaded once for all tests in a binary
static INIT: std::sync::Once = std::sync::Once::new();
pub fn ensure_config() {
    INIT.call_once(|| {
        load_configuration_for_tests().expect("Failed to load configuration for tests");
    });
}

/// Instant the fixed test clocks are frozen at.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 9, 25, 12, 0, 0).unwrap()
}

/// A real InfluxDB instance, when `ANALYTICS_TEST_INFLUXDB_URL` is set.
pub struct TestInfluxDb {
    pub settings: InfluxDbSettings,
    pub storage: InfluxDbStorage,
}

impl TestInfluxDb {
    pub fn from_env() -> Result<Option<Self>> {
        let Ok(url) = std::env::var("ANALYTICS_TEST_INFLUXDB_URL") else {
            return Ok(None);
        };
        let settings = InfluxDbSettings {
            url,
            token: std::env::var("ANALYTICS_TEST_INFLUXDB_TOKEN")
                .unwrap_or_else(|_| "mytoken".to_string()),
            org: std::env::var("ANALYTICS_TEST_INFLUXDB_ORG")
                .unwrap_or_else(|_| "analytics".to_string()),
            bucket: std::env::var("ANALYTICS_TEST_INFLUXDB_BUCKET")
                .unwrap_or_else(|_| "metrics".to_string()),
            precision: Precision::Nanoseconds,
            timeout: Duration::from_secs(10),
        };
        let storage = InfluxDbStorage::connect(settings.clone())?;
        Ok(Some(Self { settings, storage }))
    }

    /// Writes raw line protocol, bypassing the service.
    pub async fn write_line_protocol(&self, lines: &str) -> Result<()> {
        let response = reqwest::Client::new()
            .post(format!(
                "{}/api/v2/write",
                self.settings.url.trim_end_matches('/')
            ))
            .query(&[
                ("org", self.settings.org.as_str()),
                ("bucket", self.settings.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.settings.token))
            .body(lines.to_string())
            .send()
            .await?;
        anyhow::ensure!(
            response.status().is_success(),
            "line protocol write failed: {}",
            response.status()
        );
        Ok(())
    }
}

/// Measurement name no other test run uses.
pub fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}
