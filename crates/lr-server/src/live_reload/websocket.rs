//! WebSocket handler for live reload.
//!
//! Handles WebSocket connections and forwards reload commands to clients.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::IntoResponse;

use super::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;

/// Handle WebSocket upgrade for live reload.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let Some(mut registration) = state.registry.register() else {
        // Server is shutting down
        let _ = socket.send(going_away()).await;
        return;
    };
    let client = registration.id();
    tracing::debug!(%client, clients = state.registry.len(), "Live reload client connected");

    if send(&mut socket, &ServerMessage::hello()).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            // Forward reload commands to client
            message = registration.recv() => match message {
                Some(message) => {
                    if send(&mut socket, &message).await.is_err() {
                        tracing::debug!(%client, "Send failed, dropping client");
                        break;
                    }
                }
                None => {
                    let _ = socket.send(going_away()).await;
                    break;
                }
            },
            // Client messages are informational only
            result = socket.recv() => match result {
                Some(Ok(Message::Text(text))) => log_client_message(&client, text.as_str()),
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    tracing::debug!(%client, "Live reload client disconnected");
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    socket.send(Message::Text(message.to_json().into())).await
}

fn going_away() -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::AWAY,
        reason: "server stopping".into(),
    }))
}

fn log_client_message(client: &uuid::Uuid, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Hello { protocols }) => {
            tracing::debug!(%client, ?protocols, "Client hello");
        }
        Ok(ClientMessage::Info { url }) => {
            tracing::debug!(%client, url = url.as_deref().unwrap_or_default(), "Client page");
        }
        Ok(ClientMessage::Unknown) => {}
        Err(e) => tracing::trace!(%client, error = %e, "Ignoring malformed client message"),
    }
}
