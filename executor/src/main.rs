//! Coarse-grained scheduling executor.
//!
//! Registers with the driver, hosts the HTTP wire transport the driver
//! dispatches `LaunchTask`/`KillTask`/SkewTune commands through, and runs
//! tasks via the (stubbed) task runner. See `backend` for the state
//! machine itself.

#[global_allocator]
#[cfg(not(target_os = "windows"))]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const EXECUTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tracing::{error, info, warn};

mod api;
mod backend;
mod client;
mod config;
mod fetch_iterator;
mod task_runner;

use backend::ExecutorBackend;
use client::DriverClient;
use common::config::ExecutorConfig;
use config::ConfigManager;

/// Command-line arguments for the executor process (spec §6's exact
/// contract).
#[derive(Parser, Debug)]
#[command(name = "executor")]
#[command(about = "Executor process for the coarse-grained scheduling driver", long_about = None)]
struct CliArgs {
    #[arg(long = "driver-url", value_name = "URL")]
    driver_url: String,

    #[arg(long = "executor-id", value_name = "ID")]
    executor_id: String,

    #[arg(long = "hostname", value_name = "HOST")]
    hostname: String,

    #[arg(long = "cores", value_name = "N")]
    cores: u32,

    #[arg(long = "app-id", value_name = "ID")]
    app_id: String,

    #[arg(long = "worker-url", value_name = "URL")]
    worker_url: Option<String>,

    #[arg(long = "user-class-path", value_name = "PATH")]
    user_class_path: Vec<String>,

    #[arg(long = "executor-port", value_name = "PORT", default_value_t = 7077)]
    executor_port: u16,
}

async fn run(cli: CliArgs) -> Result<()> {
    let executor_config = ExecutorConfig {
        executor_id: cli.executor_id,
        driver_url: cli.driver_url,
        hostname: cli.hostname,
        cores: cli.cores,
        app_id: cli.app_id,
        worker_url: cli.worker_url,
        user_class_path: cli.user_class_path,
        executor_port: cli.executor_port,
        graceful_shutdown_timeout_secs: 30,
    };
    let config_manager = ConfigManager::from_cli(executor_config);
    let config = config_manager.executor_config;

    info!(
        executor_id = %config.executor_id,
        driver_url = %config.driver_url,
        cores = config.cores,
        "executor configuration loaded"
    );

    let driver_client = DriverClient::new(&config);
    let backend = ExecutorBackend::new(config.clone(), driver_client);

    let listen_address: SocketAddr = format!("0.0.0.0:{}", config.executor_port)
        .parse()
        .with_context(|| format!("invalid executor port {}", config.executor_port))?;

    let app_state = api::AppState { backend: backend.clone() };
    let app = api::create_router(app_state);

    let listener = tokio::net::TcpListener::bind(listen_address)
        .await
        .with_context(|| format!("failed to bind listener to {listen_address}"))?;

    info!(%listen_address, "executor listening");

    let mut stop_rx = backend.subscribe_stop();
    let shutdown_signal = async move {
        let _ = stop_rx.recv().await;
        info!("http server received shutdown signal");
    };

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
    });

    backend
        .register()
        .await
        .context("failed to register with driver")?;

    let shutdown_backend = backend.clone();
    tokio::spawn(async move {
        setup_shutdown_signal().await;
        info!("shutting down executor");
        shutdown_backend.stop();
    });

    match tokio::time::timeout(
        std::time::Duration::from_secs(config.graceful_shutdown_timeout_secs),
        server_handle,
    )
    .await
    {
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
    let file_appender = tracing_appender::rolling::daily("./logs", "executor.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("executor=info,common=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    info!(version = EXECUTOR_VERSION, "executor starting up");

    let cli = CliArgs::parse();
    if let Err(e) = run(cli).await {
        error!("executor failed: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
