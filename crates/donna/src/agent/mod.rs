//! Agent runtime contract.
//!
//! The session talks to the language-model runtime only through these traits.
//! [`claude::ClaudeCliRuntime`] drives the `claude` CLI; tests plug in scripted
//! runtimes.

pub mod claude;
pub mod config;
pub mod stream_json;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use donna_protocol::AgentEvent;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

use crate::permission::PermissionDecision;

pub use claude::ClaudeCliRuntime;
pub use config::AgentConfig;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn agent process: {0}")]
    Spawn(String),

    #[error("agent handshake failed: {0}")]
    Handshake(String),

    #[error("agent connection closed")]
    Closed,

    #[error("agent I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("agent protocol error: {0}")]
    Protocol(String),
}

/// Consulted by the runtime before every tool invocation.
#[async_trait]
pub trait PermissionHandler: Send + Sync {
    async fn can_use_tool(&self, tool_name: &str, input: &Value) -> PermissionDecision;
}

/// Everything a runtime needs to open one conversation.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
    pub model: Option<String>,
    pub max_thinking_tokens: Option<u32>,
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub work_dir: Option<PathBuf>,
    pub setting_sources: Vec<String>,
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn open(
        &self,
        options: RuntimeOptions,
        permissions: Arc<dyn PermissionHandler>,
    ) -> Result<Box<dyn AgentConnection>, RuntimeError>;
}

/// One open conversation with the runtime.
#[async_trait]
pub trait AgentConnection: Send {
    /// Queue a user utterance as the next turn.
    async fn submit(&mut self, text: &str) -> Result<(), RuntimeError>;

    /// Events of the current turn, ending right after `SessionStats`.
    ///
    /// If the runtime goes away mid-turn the stream yields
    /// [`RuntimeError::Closed`] and ends.
    fn drain_turn(&mut self) -> BoxStream<'_, Result<AgentEvent, RuntimeError>>;

    async fn close(&mut self) -> Result<(), RuntimeError>;
}
