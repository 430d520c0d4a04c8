//! Background Jobs for Larder
//!
//! - `flush`: periodically drains the pending ledger into the record store
//!
//! # Usage
//!
//! ```ignore
//! use larder_writeback::jobs::flush_task;
//! use larder_writeback::RetryForever;
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let flusher = service.flusher(RetryForever);
//! let handle = tokio::spawn(flush_task(flusher, config.clone(), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

pub mod flush;

pub use flush::flush_task;
