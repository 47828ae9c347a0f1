//! Chat over WebSocket.

mod bridge;
mod handler;
mod transport;

pub use bridge::{BridgeError, BridgeState, ChatBridge, shape_event};
pub use handler::{CLOSE_AUTH_REQUIRED, ChatQuery, chat_ws};
pub use transport::{ChatTransport, TransportError, WebSocketTransport};
