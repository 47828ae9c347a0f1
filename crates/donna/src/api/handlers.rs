//! Plain HTTP handlers.

use axum::{Json, extract::State, http::HeaderMap};
use serde::Serialize;

use super::error::ApiError;
use super::state::AppState;
use crate::auth::{AuthError, CurrentUser};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub auth_enabled: bool,
}

/// Health check (public).
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "donna-web",
        auth_enabled: state.auth.is_enabled(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub email: String,
    pub name: String,
}

impl From<&CurrentUser> for UserInfo {
    fn from(user: &CurrentUser) -> Self {
        Self {
            email: user.email().to_string(),
            name: user.name().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthStatusResponse {
    pub auth_enabled: bool,
    pub authenticated: bool,
    pub user: Option<UserInfo>,
}

/// Whether the caller is signed in (public). Never fails.
pub async fn auth_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<AuthStatusResponse> {
    let user = state.auth.authenticate(&headers, None).ok();
    Json(AuthStatusResponse {
        auth_enabled: state.auth.is_enabled(),
        authenticated: user.is_some(),
        user: user.as_ref().map(UserInfo::from),
    })
}

/// The signed-in user. Mounted behind the auth middleware.
pub async fn me(user: Result<CurrentUser, AuthError>) -> Result<Json<UserInfo>, ApiError> {
    let user = user?;
    Ok(Json(UserInfo::from(&user)))
}

/// Unknown `/api/*` paths.
pub async fn api_not_found() -> ApiError {
    ApiError::not_found("no such endpoint")
}
