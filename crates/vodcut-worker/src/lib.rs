//! VOD pipeline worker.
//!
//! This crate provides:
//! - The pipeline orchestrator with ledger checkpoints and resume
//! - Clip downloads with bounded parallelism
//! - Webhook event resolution and watch-directory polling
//! - Dispatch for direct, webhook and poll modes

pub mod config;
pub mod download;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod trigger;
pub mod watcher;

pub use config::{TriggerMode, WorkerConfig};
pub use download::{ClipDownloader, HttpDownloader};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::{init_tracing, JobLogger};
pub use pipeline::{Pipeline, PipelineOutcome, PipelineServices};
pub use trigger::TriggerResolver;
pub use watcher::VodWatcher;
