//! Shared router state.

use std::sync::Arc;

use axum::extract::FromRef;
use donna_files::FileWatchBroadcaster;

use crate::auth::AuthState;
use crate::session::SessionService;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionService,
    pub auth: AuthState,
    pub files: Arc<FileWatchBroadcaster>,
    pub default_dev_mode: bool,
}

impl AppState {
    pub fn new(
        sessions: SessionService,
        auth: AuthState,
        files: Arc<FileWatchBroadcaster>,
        default_dev_mode: bool,
    ) -> Self {
        Self {
            sessions,
            auth,
            files,
            default_dev_mode,
        }
    }
}

impl FromRef<AppState> for Arc<FileWatchBroadcaster> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.files)
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}
