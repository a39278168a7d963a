#![forbid(unsafe_code)]
use analytics_service::config::{self, load_configuration};
use analytics_service::http::server::run_http_server;
use analytics_service::http::state::HttpServerState;
use analytics_service::storage::StorageInstance;
use analytics_service::storage::influxdb::InfluxDbStorage;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{Level, event, warn};

fn main() -> Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("Failed to install CryptoProvider: {:?}", e))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    // Initialize tracing subscriber for HTTP request logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    load_configuration().context("Failed to load configuration")?;
    let config = config::get().context("Failed to get configuration")?;

    // Initialize Sentry if DSN is provided
    let _sentry = config.sentry_dsn.as_ref().map(|dsn| {
        sentry::init((
            dsn.clone(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let settings = config
        .influxdb_settings()
        .context("Invalid InfluxDB configuration")?;
    event!(
        Level::INFO,
        url = %settings.url,
        org = %settings.org,
        bucket = %settings.bucket,
        "Connecting to InfluxDB"
    );
    let storage: Arc<dyn StorageInstance> =
        Arc::new(InfluxDbStorage::connect(settings).context("Failed to create InfluxDB client")?);

    // Not fatal: the readiness probe reports it until the backend is up
    if let Err(err) = storage.health_check().await {
        warn!("InfluxDB is not reachable yet: {}", err);
    }

    // Exit the program if a panic occurs
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    let address = SocketAddr::from((config.endpoint, config.port));
    event!(Level::INFO, "Starting HTTP server on {}", address);
    let state = HttpServerState::new("Analytics Service", storage, config.storage_timeout());
    match run_http_server(state, address).await {
        Ok(_) => {
            event!(Level::INFO, "HTTP server stopped gracefully");
            Ok(())
        }
        Err(err) => {
            event!(Level::ERROR, "HTTP server failed to start: {}", err);
            Err(err)
        }
    }
}
