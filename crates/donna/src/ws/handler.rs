//! `/ws/chat` upgrade handler.

use axum::{
    extract::{
        Query, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::bridge::ChatBridge;
use super::transport::{ChatTransport, WebSocketTransport};
use crate::api::AppState;
use crate::auth::CurrentUser;

/// Close code sent when the upgrade request carried no valid credentials.
pub const CLOSE_AUTH_REQUIRED: u16 = 4001;

#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    pub timezone: Option<String>,
    pub token: Option<String>,
}

/// Upgrade to a chat connection.
///
/// Authentication happens here rather than in middleware so a rejected client
/// still gets a WebSocket close frame it can act on.
pub async fn chat_ws(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user = state.auth.authenticate(&headers, query.token.as_deref());
    ws.on_upgrade(move |socket| handle_chat_socket(socket, state, user.ok(), query.timezone))
}

async fn handle_chat_socket(
    socket: WebSocket,
    state: AppState,
    user: Option<CurrentUser>,
    timezone: Option<String>,
) {
    let mut transport = WebSocketTransport::new(socket);

    let Some(user) = user else {
        debug!("Rejecting unauthenticated chat connection");
        if let Err(err) = transport
            .close(CLOSE_AUTH_REQUIRED, "Authentication required")
            .await
        {
            debug!("Failed to send close frame: {err}");
        }
        return;
    };

    let session = state.sessions.create();
    info!(session = %session.id(), user = %user.email(), "Chat connection opened");

    let bridge = ChatBridge::new(transport, state.default_dev_mode).with_timezone(timezone);
    if let Err(err) = bridge.run(session).await {
        warn!("Chat connection ended with error: {err}");
    }
}
