use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use camrelay_signaling::ConnectionId;
use tracing::{info, warn};

use crate::state::AppState;

/// The signaling endpoint: a WebSocket carrying the JSON
/// envelopes `camrelay-signaling` decodes. One connection may multiplex
/// several offers, each tagged with this connection's identity.
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle(socket, state))
}

async fn handle(mut socket: WebSocket, state: AppState) {
    let connection = ConnectionId::new();
    info!(%connection, "signaling connection opened");

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!(%connection, error = %err, "signaling socket error");
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => continue,
        };

        if let Some(reply) = state.signaling.dispatch_text(connection, &text).await {
            let payload = match serde_json::to_string(&reply) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(%connection, error = %err, "failed to encode signaling reply");
                    continue;
                }
            };
            if socket.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    }

    info!(%connection, "signaling connection closed");
}
