//! Route definitions.

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::get,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};

use super::config::ServerConfig;
use super::handlers;
use super::state::AppState;
use crate::auth::auth_middleware;
use crate::ws;

/// Build the application router.
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let auth_state = state.auth.clone();

    let public_routes = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/auth/status", get(handlers::auth_status))
        // Authenticates during the upgrade so it can answer with a close code.
        .route("/ws/chat", get(ws::chat_ws))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/me", get(handlers::me))
        .merge(donna_files::routes::watch_routes::<AppState>())
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .with_state(state);

    let mut router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .route("/api/{*path}", get(handlers::api_not_found));

    if let Some(static_dir) = server.static_dir.as_deref() {
        info!("Serving web client from {static_dir}");
        let index = format!("{}/index.html", static_dir.trim_end_matches('/'));
        router = router.fallback_service(ServeDir::new(static_dir).fallback(ServeFile::new(index)));
    }

    router
        .layer(build_cors_layer(&server.cors_origins))
        .layer(trace_layer)
}

/// Build the CORS layer. With no configured origins any origin is allowed.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let headers = [
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        header::ACCEPT,
        header::ORIGIN,
        header::COOKIE,
    ];

    if allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods(methods)
            .allow_headers(headers);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                warn!("CORS: Invalid origin in config: {}", origin);
                None
            })
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(true)
}
