//! Thin axum WebSocket adapter over [`ConnectionHub`]. This is the one
//! place that touches a real socket; everything else in `hub` is plain
//! state and is tested without one.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ConnectionHub;

#[derive(Clone)]
struct HubState {
    hub: Arc<ConnectionHub>,
}

#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    action: String,
    channel: Option<String>,
    #[serde(flatten)]
    payload: serde_json::Value,
}

pub fn router(hub: Arc<ConnectionHub>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(HubState { hub })
}

async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<HubState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<ConnectionHub>) {
    let client_id = Uuid::new_v4().to_string();
    let mut rx = hub.connect(client_id.clone());
    let (mut sink, mut stream) = socket.split();

    let writer_hub = hub.clone();
    let writer_client = client_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                writer_hub.record_error(&writer_client);
                break;
            }
        }
    });

    let reader_hub = hub.clone();
    let reader_client = client_id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                match serde_json::from_str::<InboundEnvelope>(&text) {
                    Ok(envelope) => {
                        let channel = envelope.channel.clone().unwrap_or_default();
                        debug!(client = %reader_client, action = %envelope.action, %channel, "inbound frame");
                        reader_hub.dispatch_inbound(&reader_client, &channel, &envelope.payload);
                    }
                    Err(e) => {
                        warn!(client = %reader_client, error = %e, "malformed inbound frame");
                        reader_hub.record_error(&reader_client);
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    hub.disconnect(&client_id);
    info!(client_id = %client_id, "socket closed");
}
