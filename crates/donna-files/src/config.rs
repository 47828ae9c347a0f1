use serde::{Deserialize, Serialize};

/// File watch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Extensions (without the dot) that count as documents.
    pub extensions: Vec<String>,
    /// Per-subscriber queue depth. Events beyond it are dropped for that subscriber.
    pub subscriber_buffer: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["md".to_string()],
            subscriber_buffer: 256,
        }
    }
}
