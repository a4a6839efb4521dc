//! Live detection feed over WebSocket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::broadcast::BroadcastMessage;
use crate::state::RecordState;

/// Push every new record to the client
///
/// Messages are `{"type": "new_detection" | "monitor_detection", "data": record}`.
/// Slow clients skip what they missed.
#[utoipa::path(
    get,
    path = "/ws/detections",
    tag = "records",
    responses(
        (status = 101, description = "Switching to WebSocket", body = BroadcastMessage)
    )
)]
pub async fn detections_ws(
    State(records): State<RecordState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| forward_detections(socket, records))
}

async fn forward_detections(socket: WebSocket, records: RecordState) {
    let mut feed = records.broadcaster.subscribe();
    let (mut sender, mut receiver) = socket.split();

    tracing::info!(
        clients = records.broadcaster.client_count(),
        "WebSocket client connected"
    );

    loop {
        tokio::select! {
            message = feed.recv() => match message {
                Ok(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize broadcast");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "WebSocket client lagged, messages dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Ping(payload))) => {
                    if sender.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                // Clients have nothing to say on this channel
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sender.close().await;
    tracing::info!("WebSocket client disconnected");
}
