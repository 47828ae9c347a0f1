//! Chat transport abstraction.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use donna_protocol::ServerMessage;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,
}

/// A bidirectional text channel to one chat client.
#[async_trait]
pub trait ChatTransport: Send {
    async fn send(&mut self, message: &ServerMessage) -> Result<(), TransportError>;

    /// Next inbound text frame. `None` once the client is gone.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// [`ChatTransport`] over an axum WebSocket.
pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl ChatTransport for WebSocketTransport {
    async fn send(&mut self, message: &ServerMessage) -> Result<(), TransportError> {
        let json = serde_json::to_string(message)?;
        self.socket
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.socket.recv().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(data)) => {
                    return Some(Ok(String::from_utf8_lossy(&data).into_owned()));
                }
                Ok(Message::Ping(payload)) => {
                    if let Err(e) = self.socket.send(Message::Pong(payload)).await {
                        debug!("Failed to answer ping: {e}");
                    }
                }
                Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => return None,
                Err(e) => return Some(Err(TransportError::WebSocket(e.to_string()))),
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.socket
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.to_string().into(),
            })))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}
