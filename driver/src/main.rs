//! Coarse-grained scheduling driver.
//!
//! Hosts the executor registry, the SkewTune rebalancing controllers, and
//! the HTTP wire transport executors register and report through. This is
//! the process entry point; see `driver_endpoint` for the coordination
//! logic itself.

#[global_allocator]
#[cfg(not(target_os = "windows"))]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

mod api;
mod client;
mod config;
mod driver_endpoint;
mod registry;
mod scheduler_backend;
mod skewtune;

use api::AppState;
use config::ConfigManager;
use driver_endpoint::DriverEndpoint;
use scheduler_backend::{NoopTaskScheduler, SchedulerBackend};

/// Command-line arguments for the driver process.
#[derive(Parser, Debug)]
#[command(name = "driver")]
#[command(about = "Coarse-grained scheduling driver with skew mitigation", long_about = None)]
struct CliArgs {
    /// Path to a directory containing driver.toml, or to the file itself.
    #[arg(value_name = "CONFIG_PATH", default_value = ".")]
    config_path: PathBuf,

    /// Override the listen address from the config file.
    #[arg(long = "listen-address", value_name = "ADDRESS")]
    listen_address: Option<String>,

    /// Total cores expected to register, used by the readiness gate
    /// (spec §6's `minRegisteredResourcesRatio`). Zero disables the ratio
    /// check regardless of config.
    #[arg(long = "expected-total-cores", default_value_t = 0)]
    expected_total_cores: u64,
}

async fn run(cli: CliArgs) -> Result<()> {
    let mut config_manager = ConfigManager::load(&cli.config_path)?;
    config_manager.apply_overrides(cli.listen_address);
    let driver_config = config_manager.driver_config.clone();

    let listen_address: SocketAddr = driver_config
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen address '{}'", driver_config.listen_address))?;

    info!(
        %listen_address,
        revive_interval_secs = driver_config.revive_interval_secs,
        "driver configuration loaded"
    );

    let driver = Arc::new(DriverEndpoint::new(driver_config.clone(), Arc::new(NoopTaskScheduler)));
    driver.set_expected_total_cores(cli.expected_total_cores);
    driver.start().await;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let revive_interval = driver_config.revive_interval();
    let revive_driver = Arc::clone(&driver);
    let mut revive_shutdown_rx = shutdown_tx.subscribe();
    let revive_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(revive_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    revive_driver.revive_offers().await;
                }
                _ = revive_shutdown_rx.recv() => {
                    info!("revive timer received shutdown signal");
                    break;
                }
            }
        }
    });

    let app_state = AppState { driver: Arc::clone(&driver) };
    let app = api::create_router(app_state);

    let listener = tokio::net::TcpListener::bind(listen_address)
        .await
        .with_context(|| format!("failed to bind listener to {listen_address}"))?;

    info!(%listen_address, "driver listening");

    let mut server_shutdown_rx = shutdown_tx.subscribe();
    let shutdown_signal = async move {
        let _ = server_shutdown_rx.recv().await;
        info!("http server received shutdown signal");
    };

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
    });

    setup_shutdown_signal().await;
    info!("shutting down driver");

    if shutdown_tx.send(()).is_err() {
        warn!("no background tasks were listening for shutdown");
    }
    driver.stop().await;

    let shutdown_timeout = Duration::from_secs(driver_config.graceful_shutdown_timeout_secs);
    match tokio::time::timeout(shutdown_timeout, revive_task).await {
        Ok(Ok(())) => info!("revive timer task completed"),
        Ok(Err(e)) => warn!("revive timer task panicked: {e}"),
        Err(_) => warn!("revive timer task shutdown timeout reached, aborting"),
    }
    match tokio::time::timeout(shutdown_timeout, server_handle).await {
        Ok(Ok(Ok(()))) => info!("http server completed"),
        Ok(Ok(Err(e))) => error!("http server error: {e}"),
        Ok(Err(e)) => warn!("http server task panicked: {e}"),
        Err(_) => warn!("http server shutdown timeout reached, aborting"),
    }

    Ok(())
}

async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());
        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("failed to register signal handlers: {e}");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("failed to wait for Ctrl+C: {e}");
                } else {
                    info!("received Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to receive Ctrl+C signal: {e}");
        } else {
            info!("received Ctrl+C");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "driver.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("driver=info,common=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    info!(version = DRIVER_VERSION, "driver starting up");

    let cli = CliArgs::parse();
    if let Err(e) = run(cli).await {
        error!("driver failed: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
