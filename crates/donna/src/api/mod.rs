//! HTTP and WebSocket surface.

mod config;
mod error;
mod handlers;
mod routes;
mod state;

pub use config::ServerConfig;
pub use error::ApiError;
pub use handlers::{AuthStatusResponse, HealthResponse, UserInfo};
pub use routes::create_router;
pub use state::AppState;
