//! Webhook ingress for recorder events.
//!
//! This crate provides:
//! - An axum listener that acknowledges events immediately
//! - Shared-token authentication of the webhook
//! - Forwarding of finished-recording events to the pipeline dispatcher
//! - Optional Prometheus `/metrics`

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use server::serve;
pub use state::AppState;
