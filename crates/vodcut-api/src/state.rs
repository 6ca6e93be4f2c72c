//! Application state.

use std::sync::Arc;

use tokio::sync::mpsc;
use vodcut_models::DvrEvent;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    /// Accepted events, consumed by the pipeline dispatcher
    pub events: mpsc::Sender<DvrEvent>,
}

impl AppState {
    pub fn new(config: ApiConfig, events: mpsc::Sender<DvrEvent>) -> Self {
        Self {
            config: Arc::new(config),
            events,
        }
    }
}
