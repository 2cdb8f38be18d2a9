use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::models::DeliveryStatus;
use crate::push::{PushFrame, PushSocket};

use super::server::ApiState;

pub async fn health_handler(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started.elapsed().as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub user_id: i64,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Paginated notification history for a user. The row's `status` and
/// `error` are surfaced verbatim as the authoritative per-attempt outcome.
pub async fn list_notifications_handler(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<ListParams>,
) -> Response {
    let status = match params.status.as_deref() {
        None | Some("all") => None,
        Some(raw) => match DeliveryStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("unknown status filter: {raw}")})),
                )
                    .into_response()
            }
        },
    };

    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let offset = params.offset.unwrap_or(0).max(0);

    match state
        .store
        .notifications_for_user(params.user_id, status, limit, offset)
        .await
    {
        Ok((notifications, total)) => Json(json!({
            "notifications": notifications,
            "total": total,
            "limit": limit,
            "offset": offset,
        }))
        .into_response(),
        Err(e) => {
            warn!(user_id = params.user_id, error = %e, "notification listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "storage failure"})),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AlertListParams {
    pub user_id: i64,
    pub silenced: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Paginated alert history for a user.
pub async fn list_alerts_handler(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<AlertListParams>,
) -> Response {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let offset = params.offset.unwrap_or(0).max(0);

    match state
        .store
        .alerts_for_user(params.user_id, params.silenced, limit, offset)
        .await
    {
        Ok((alerts, total)) => Json(json!({
            "alerts": alerts,
            "total": total,
            "limit": limit,
            "offset": offset,
        }))
        .into_response(),
        Err(e) => {
            warn!(user_id = params.user_id, error = %e, "alert listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "storage failure"})),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: i64,
}

/// Upgrade to a WebSocket and register it with the push bus.
pub async fn ws_handler(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| subscriber_loop(state, params.user_id, socket))
}

async fn subscriber_loop(state: Arc<ApiState>, user_id: i64, mut socket: WebSocket) {
    let (push_socket, mut frames) = PushSocket::pair();
    let socket_id = push_socket.id();

    if state.push.add_subscriber(user_id, push_socket).is_err() {
        let _ = socket
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code: axum::extract::ws::close_code::POLICY,
                reason: "subscriber limit reached".into(),
            })))
            .await;
        return;
    }

    info!(user_id, socket_id, "websocket subscriber connected");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let message = match frame {
                    PushFrame::Text(text) => Message::Text(text.into()),
                    PushFrame::Ping => Message::Ping(Vec::new().into()),
                };
                if sink.send(message).await.is_err() {
                    debug!(user_id, socket_id, "websocket write failed");
                    break;
                }
            }

            incoming = stream.next() => {
                match incoming {
                    // Clients only ever send control frames; ignore them.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.push.remove_subscriber(user_id, socket_id);
    info!(user_id, socket_id, "websocket subscriber disconnected");
}
