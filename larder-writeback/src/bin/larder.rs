//! Larder entry point
//!
//! Connects to PostgreSQL and Redis, checks the record store, then runs the
//! flush loop until Ctrl-C. On shutdown the flush task gets one last cycle.

use std::sync::Arc;

use larder_core::{CacheError, LarderError, StoreError, WriteBackConfig};
use larder_storage::{CacheStoreConfig, DbConfig, PgRecordStore, RedisCacheStore};
use larder_writeback::telemetry::{init_tracing, TelemetryConfig, TelemetryError};
use larder_writeback::{flush_task, ProductService, RetryForever};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Larder(#[from] LarderError),

    #[error("Flush task failed: {0}")]
    FlushTask(#[from] tokio::task::JoinError),
}

impl From<StoreError> for StartupError {
    fn from(err: StoreError) -> Self {
        StartupError::Larder(err.into())
    }
}

impl From<CacheError> for StartupError {
    fn from(err: CacheError) -> Self {
        StartupError::Larder(err.into())
    }
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    init_tracing(&TelemetryConfig::from_env())?;

    let config = WriteBackConfig::from_env();
    config.validate().map_err(LarderError::from)?;

    let db_config = DbConfig::from_env();
    let store = Arc::new(PgRecordStore::from_config(&db_config)?);
    store.ensure_schema().await?;

    let cache_config = CacheStoreConfig::from_env();
    tracing::info!(url = %cache_config.redacted_url(), "Connecting to cache store");
    let cache = Arc::new(RedisCacheStore::connect(&cache_config).await?);

    let service = ProductService::new(store, cache, config.clone());
    service.startup_check().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flusher = service.flusher(RetryForever);
    let handle = tokio::spawn(flush_task(flusher, config, shutdown_rx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    handle.await?;

    Ok(())
}
