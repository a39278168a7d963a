use crate::storage::influxdb::InfluxDbSettings;
use anyhow::Error;
use confique::Config;
use std::{
    net::IpAddr,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

#[derive(Debug, Config)]
pub struct AnalyticsConfig {
    #[config(env = "ANALYTICS_PORT", default = 5000)]
    pub port: u16,
    #[config(env = "ANALYTICS_ENDPOINT", default = "0.0.0.0")]
    pub endpoint: IpAddr,

    #[config(env = "ANALYTICS_HTTP_BODY_LIMIT", default = "10mb")]
    pub http_body_limit: String,

    #[config(env = "ANALYTICS_HTTP_SERVER_TIMEOUT_SECONDS", default = 30)]
    pub http_server_timeout_seconds: u64,

    #[config(env = "ANALYTICS_INFLUXDB_URL", default = "http://localhost:8086")]
    pub influxdb_url: String,

    #[config(env = "ANALYTICS_INFLUXDB_TOKEN", default = "mytoken")]
    pub influxdb_token: String,

    #[config(env = "ANALYTICS_INFLUXDB_ORG", default = "analytics")]
    pub influxdb_org: String,

    #[config(env = "ANALYTICS_INFLUXDB_BUCKET", default = "metrics")]
    pub influxdb_bucket: String,

    /// Timestamp precision of the writes: ns, us, ms or s.
    #[config(env = "ANALYTICS_INFLUXDB_PRECISION", default = "ns")]
    pub influxdb_precision: String,

    /// Bound of every single InfluxDB call.
    #[config(env = "ANALYTICS_STORAGE_TIMEOUT_SECONDS", default = 10)]
    pub storage_timeout_seconds: u64,

    #[config(env = "ANALYTICS_SENTRY_DSN")]
    pub sentry_dsn: Option<String>,
}

impl AnalyticsConfig {
    pub fn load() -> Result<AnalyticsConfig, Error> {
        let c = AnalyticsConfig::builder()
            .env()
            .file("settings.toml")
            .load()?;

        Ok(c)
    }

    pub fn parse_http_body_limit(&self) -> Result<usize, Error> {
        let size = byte_unit::Byte::parse_str(self.http_body_limit.clone(), true)?.as_u64();
        if size > 128 * 1024 * 1024 * 1024 {
            anyhow::bail!("Body size is too big: > 128GB");
        }
        Ok(size as usize)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_seconds)
    }

    pub fn influxdb_settings(&self) -> Result<InfluxDbSettings, Error> {
        if self.storage_timeout_seconds == 0 {
            anyhow::bail!("ANALYTICS_STORAGE_TIMEOUT_SECONDS must be greater than 0");
        }
        Ok(InfluxDbSettings {
            url: self.influxdb_url.clone(),
            token: self.influxdb_token.clone(),
            org: self.influxdb_org.clone(),
            bucket: self.influxdb_bucket.clone(),
            precision: self.influxdb_precision.parse()?,
            timeout: self.storage_timeout(),
        })
    }
}

static ANALYTICS_CONFIG: OnceLock<Arc<AnalyticsConfig>> = OnceLock::new();

pub fn get() -> Result<Arc<AnalyticsConfig>, Error> {
    ANALYTICS_CONFIG.get().cloned().ok_or_else(|| {
        Error::msg(
            "Configuration not loaded. Please call load_configuration() before using the configuration",
        )
    })
}

pub fn load_configuration() -> Result<(), Error> {
    // Check if the configuration has already been loaded
    if ANALYTICS_CONFIG.get().is_some() {
        return Ok(());
    }

    let config = AnalyticsConfig::load()?;
    ANALYTICS_CONFIG.get_or_init(|| Arc::new(config));

    Ok(())
}

static TEST_CONFIG_INIT: Mutex<()> = Mutex::new(());

/// Loads the configuration exactly once per test run.
/// Available for both unit tests and integration tests
pub fn load_configuration_for_tests() -> Result<(), Error> {
    let _guard = TEST_CONFIG_INIT
        .lock()
        .map_err(|_| Error::msg("Test configuration lock poisoned"))?;

    if ANALYTICS_CONFIG.get().is_some() {
        return Ok(());
    }

    let config = AnalyticsConfig::load()?;
    ANALYTICS_CONFIG.get_or_init(|| Arc::new(config));

    Ok(())
}
