//! WebSocket handler for file-change notifications.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use tracing::{debug, error};

use crate::broadcaster::FileWatchBroadcaster;

/// Close code sent when the watcher cannot be started.
const CLOSE_WATCH_UNAVAILABLE: u16 = 1011;

/// GET /ws/files - stream `connected` then document changes under the data directory.
pub async fn watch_ws(
    State(broadcaster): State<Arc<FileWatchBroadcaster>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| watch_socket(socket, broadcaster))
}

async fn watch_socket(mut socket: WebSocket, broadcaster: Arc<FileWatchBroadcaster>) {
    let mut subscription = match broadcaster.subscribe().await {
        Ok(subscription) => subscription,
        Err(err) => {
            error!("Failed to subscribe to file changes: {err}");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_WATCH_UNAVAILABLE,
                    reason: "File watcher unavailable".into(),
                })))
                .await;
            return;
        }
    };

    loop {
        tokio::select! {
            outgoing = subscription.recv() => {
                let Some(message) = outgoing else {
                    break;
                };
                let Ok(data) = serde_json::to_string(&message) else {
                    continue;
                };
                if socket.send(Message::Text(data.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = socket.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!("File watch socket receive error: {:?}", err);
                        break;
                    }
                }
            }
        }
    }

    broadcaster.unsubscribe(subscription.id()).await;
}
