use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ApiConfig;
use crate::push::PushBus;
use crate::store::SharedStore;

use super::handlers::{
    health_handler, list_alerts_handler, list_notifications_handler, ws_handler,
};

/// Shared state for the HTTP handlers.
pub struct ApiState {
    pub store: SharedStore,
    pub push: Arc<PushBus>,
    pub started: Instant,
}

impl ApiState {
    pub fn new(store: SharedStore, push: Arc<PushBus>) -> Self {
        Self {
            store,
            push,
            started: Instant::now(),
        }
    }
}

/// Serve the API until cancellation.
pub async fn serve(config: &ApiConfig, state: Arc<ApiState>, cancel: CancellationToken) -> Result<()> {
    let routes = Router::new()
        .route("/healthz", get(health_handler))
        .route("/notifications", get(list_notifications_handler))
        .route("/alerts", get(list_alerts_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let app = Router::new().nest(&config.base_path, routes);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind API listener on {addr}"))?;

    info!(address = %addr, base_path = %config.base_path, "API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("API server failed")?;

    info!("API server stopped");
    Ok(())
}
