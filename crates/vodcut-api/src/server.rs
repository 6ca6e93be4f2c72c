//! Listener lifecycle.

use std::future::Future;

use axum::Router;
use tracing::info;

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(config: &ApiConfig, app: Router, shutdown: F) -> ApiResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ApiError::Bind {
            addr: addr.clone(),
            source,
        })?;

    info!("Listening on http://{}{}", addr, config.webhook_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Listener stopped");
    Ok(())
}
