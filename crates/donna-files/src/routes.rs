//! Route definitions for the file watch endpoint.

use std::sync::Arc;

use axum::{Router, extract::FromRef, routing::get};

use crate::broadcaster::FileWatchBroadcaster;
use crate::handlers;

/// `/ws/files`, for any router state that can hand out the broadcaster.
pub fn watch_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    Arc<FileWatchBroadcaster>: FromRef<S>,
{
    Router::new().route("/ws/files", get(handlers::watch_ws))
}

/// Standalone router with the broadcaster as its state.
pub fn create_router(broadcaster: Arc<FileWatchBroadcaster>) -> Router {
    watch_routes().with_state(broadcaster)
}
