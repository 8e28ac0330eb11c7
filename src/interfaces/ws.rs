//! WebSocket surface.
//!
//! Clients connect to `/ws?token=<token>` and manage their room membership
//! with `{type: "subscribe"|"unsubscribe", data: {room}}` messages. Outbound
//! traffic is whatever the Broadcast Hub fans into this client's queue.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::broadcast::BroadcastHub;

#[derive(Clone)]
pub struct WsState {
    pub hub: Arc<BroadcastHub>,
    pub auth_token: String,
}

/// Builds the HTTP surface: the WebSocket upgrade route and a health probe.
pub fn router(hub: Arc<BroadcastHub>, auth_token: String) -> Router {
    let state = WsState { hub, auth_token };
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    axum::Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Compare two byte slices in constant time, examining every byte even after
/// a mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Axum handler for the WebSocket upgrade request. The bearer credential
/// arrives as a `?token=` query parameter and is checked before upgrading.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if state.auth_token.is_empty()
        || !constant_time_eq(token.as_bytes(), state.auth_token.as_bytes())
    {
        warn!("WebSocket connection rejected: invalid token");
        return (StatusCode::FORBIDDEN, "Invalid or missing token").into_response();
    }

    ws.on_upgrade(move |socket| handle_connection(socket, state.hub))
        .into_response()
}

/// Incoming client message: subscribe/unsubscribe to a room.
#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: ClientMessageData,
}

#[derive(Debug, Default, Deserialize)]
struct ClientMessageData {
    room: Option<String>,
}

async fn handle_connection(socket: WebSocket, hub: Arc<BroadcastHub>) {
    let (client_id, mut outbound) = hub.register_client().await;
    info!(client_id = %client_id, "websocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // Drain the hub's queue for this client.
            envelope = outbound.recv() => {
                match envelope {
                    Some(envelope) => {
                        let json = match serde_json::to_string(&envelope) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(client_id = %client_id, error = %e, "failed to serialize envelope");
                                continue;
                            }
                        };
                        if let Err(e) = sender.send(Message::Text(json)).await {
                            debug!(client_id = %client_id, error = %e, "websocket send failed");
                            break;
                        }
                    }
                    // Hub dropped this client (e.g. full buffer).
                    None => break,
                }
            }

            // Process incoming frames.
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&hub, client_id, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        debug!(client_id = %client_id, "binary frame ignored");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(client_id = %client_id, "websocket closed by client");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(client_id = %client_id, error = %e, "websocket receive error");
                        break;
                    }
                }
            }
        }
    }

    hub.unregister_client(client_id).await;
    info!(client_id = %client_id, "websocket disconnected");
}

async fn handle_client_message(hub: &BroadcastHub, client_id: Uuid, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(client_id = %client_id, error = %e, "unparseable client message ignored");
            return;
        }
    };

    let Some(room) = message.data.room else {
        debug!(client_id = %client_id, kind = %message.kind, "client message without room ignored");
        return;
    };

    match message.kind.as_str() {
        "subscribe" => hub.subscribe(client_id, &room).await,
        "unsubscribe" => hub.unsubscribe(client_id, &room).await,
        other => {
            debug!(client_id = %client_id, kind = %other, "unknown client message type ignored");
        }
    }
}
