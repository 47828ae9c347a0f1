//! `[server]` configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Built web client to serve at `/`. Nothing is served when unset.
    pub static_dir: Option<String>,

    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,

    /// Whether chat clients see thinking and tool traffic before they send
    /// their first `devMode` flag.
    pub default_dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            static_dir: None,
            cors_origins: Vec::new(),
            default_dev_mode: true,
        }
    }
}
