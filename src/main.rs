//! Shunt - Entry Point
//!
//! Loads configuration from fixed locations, ensures TLS material exists,
//! builds the routing table, and runs the TLS listener with graceful
//! shutdown support.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use shunt::ban::BanTable;
use shunt::cert;
use shunt::config::{self, MainConfig};
use shunt::error::{Result, ShuntError};
use shunt::proxy::{Forwarder, ProxyServer, Router};

const MAIN_CONFIG_PATH: &str = "configs/config.yaml";
const ENDPOINTS_DIR: &str = "configs/endpoints";
const EVICTION_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Load main config before logging exists; a failure here surfaces on
    // stderr through the non-zero exit.
    let config = config::load_main_config(MAIN_CONFIG_PATH)?;
    let _log_guard = init_tracing(&config)?;
    info!("starting shunt reverse proxy");

    let routes = config::load_endpoints(ENDPOINTS_DIR)?;
    info!("loaded {} route(s)", routes.len());

    let bans = Arc::new(BanTable::new());
    bans.start_eviction_loop(EVICTION_INTERVAL);

    let (cert_path, key_path) = cert::ensure_cert(
        config.https_cert_path.as_deref(),
        config.https_key_path.as_deref(),
    )?;

    let router = Arc::new(Router::new(routes, Arc::clone(&bans), Forwarder::new()?));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let server = ProxyServer::bind(addr, &cert_path, &key_path, router).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server_task = tokio::spawn(async move { server.run(shutdown_rx).await });

    tokio::select! {
        result = &mut server_task => {
            result.expect("proxy server task panicked")?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
            let _ = server_task.await;
        }
    }

    info!("shunt stopped");
    Ok(())
}

/// Initialize tracing from the main config's log block.
///
/// The returned guard must stay alive for the non-blocking writer to flush.
fn init_tracing(config: &MainConfig) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_new(&config.log.level)
        .map_err(|e| ShuntError::InvalidConfig(format!("invalid log level: {}", e)))?;

    let (writer, guard) = if config.log.output == "stdout" {
        tracing_appender::non_blocking(std::io::stdout())
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log.output)?;
        tracing_appender::non_blocking(file)
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    if config.log.format.eq_ignore_ascii_case("json") {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(guard)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
