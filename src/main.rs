//! OneOff scheduler service.
//!
//! Main entry point: initialises logging and the SQLite store, wires the
//! worker pool to the webhook delivery service, and coordinates graceful
//! shutdown.

mod config;

use std::{str::FromStr, sync::Arc};

use anyhow::{Context, Result};
use oneoff_core::{migrate, ExecutorRegistry, JobEventHandler, Storage};
use oneoff_webhook::WebhookService;
use oneoff_worker::WorkerPool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{error, info};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.log_filter);

    info!(db_path = %config.db_path, workers = config.resolved_worker_count(), "starting oneoff");

    let pool = connect_database(&config).await?;
    migrate(&pool).await.context("schema migration failed")?;
    info!("database ready");

    let storage = Storage::new(pool.clone());

    let mut registry = ExecutorRegistry::new();
    oneoff_executors::register_builtin_executors(&mut registry);
    let registry = Arc::new(registry);

    let webhook_service = Arc::new(
        WebhookService::new(storage.clone(), config.to_webhook_config())
            .context("failed to build webhook service")?,
    );
    webhook_service.start();

    let worker_pool = Arc::new(
        WorkerPool::new(storage, registry, config.to_pool_config())
            .with_event_handler(Arc::clone(&webhook_service) as Arc<dyn JobEventHandler>),
    );
    worker_pool.start().await.context("failed to start worker pool")?;

    info!("oneoff is running");

    shutdown_signal().await;
    info!("shutdown signal received");

    if let Err(e) = worker_pool.shutdown().await {
        error!(error = %e, "worker pool did not stop cleanly");
    }
    webhook_service.shutdown().await;

    pool.close().await;
    info!("shutdown complete");
    Ok(())
}

/// Initialises tracing; `RUST_LOG` wins over the configured filter.
fn init_tracing(fallback_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(true)).init();
}

/// Opens the SQLite pool, creating the database file on first run.
async fn connect_database(config: &Config) -> Result<sqlx::SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.db_path))
        .context("invalid database path")?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to open database")
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
