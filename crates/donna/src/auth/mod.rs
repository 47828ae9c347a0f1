//! Authentication module.
//!
//! Single-user JWT auth. Tokens are HS256, minted by `donna token` and
//! accepted from the Authorization header, a cookie or the `token` query
//! parameter. With auth disabled every request runs as the local user.

mod claims;
mod config;
mod error;
mod middleware;

pub use claims::Claims;
pub use config::{AuthConfig, ConfigValidationError};
pub use error::AuthError;
pub use middleware::{AuthState, CurrentUser, auth_middleware};
