//! Recorder webhook.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};
use vodcut_models::DvrEvent;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Header carrying the shared secret.
pub const WEBHOOK_TOKEN_HEADER: &str = "x-webhook-token";

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub status: &'static str,
}

/// Acknowledge an event and hand it to the dispatcher.
///
/// The response never waits for processing.
pub async fn receive_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<AckResponse>> {
    if let Some(expected) = state.config.webhook_token.as_deref() {
        let given = headers
            .get(WEBHOOK_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default();
        if given != expected {
            warn!("Rejected webhook with bad token");
            return Err(ApiError::Unauthorized);
        }
    }

    let payload: Value =
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let event = DvrEvent::from_value(&payload);

    if !event.is_end_download() {
        info!(action = ?event.action, "Ignoring webhook event");
        metrics::record_webhook_event("ignored");
        return Ok(Json(AckResponse { status: "ok" }));
    }

    match state.events.try_send(event) {
        Ok(()) => {
            info!("Accepted end_download event");
            metrics::record_webhook_event("accepted");
            Ok(Json(AckResponse { status: "ok" }))
        }
        Err(TrySendError::Full(_)) => {
            warn!("Dispatcher queue full, dropping event");
            metrics::record_webhook_event("dropped");
            Err(ApiError::Unavailable("queue full".to_string()))
        }
        Err(TrySendError::Closed(_)) => {
            metrics::record_webhook_event("dropped");
            Err(ApiError::Unavailable("shutting down".to_string()))
        }
    }
}
