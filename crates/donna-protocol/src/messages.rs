//! Chat wire protocol.
//!
//! One JSON object per WebSocket text frame, tagged by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::events::SessionStats;

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A user utterance. `devMode` updates the connection's verbose flag when present.
    /// Blank content is skipped by the receiver.
    Message {
        #[serde(default)]
        content: String,
        #[serde(rename = "devMode", default, skip_serializing_if = "Option::is_none")]
        dev_mode: Option<bool>,
    },

    /// Answer to an open permission prompt. A missing `allowed` denies.
    PermissionResponse {
        #[serde(default)]
        allowed: bool,
    },

    /// Client is leaving.
    Disconnect,
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl ClientMessage {
    /// Decode one inbound text frame. Message content is trimmed.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text).map_err(|_| DecodeError::InvalidJson)?;
        let message: ClientMessage = serde_json::from_value(value)
            .map_err(|e| DecodeError::InvalidMessage(e.to_string()))?;

        match message {
            ClientMessage::Message { content, dev_mode } => Ok(ClientMessage::Message {
                content: content.trim().to_string(),
                dev_mode,
            }),
            other => Ok(other),
        }
    }

    /// Wire name of the message type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Message { .. } => "message",
            ClientMessage::PermissionResponse { .. } => "permission_response",
            ClientMessage::Disconnect => "disconnect",
        }
    }
}

/// Messages sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Text {
        content: String,
    },

    Thinking {
        content: String,
    },

    ToolUse {
        name: String,
        input: Value,
        #[serde(rename = "toolId")]
        tool_id: String,
        #[serde(rename = "parentToolUseId")]
        parent_tool_use_id: Option<String>,
    },

    ToolResult {
        content: String,
        #[serde(rename = "isError")]
        is_error: bool,
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        #[serde(rename = "parentToolUseId")]
        parent_tool_use_id: Option<String>,
    },

    PermissionRequest {
        tool: String,
        input: Value,
    },

    SessionEnd {
        stats: SessionStats,
    },

    GreetingStart,

    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name of the message type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Text { .. } => "text",
            ServerMessage::Thinking { .. } => "thinking",
            ServerMessage::ToolUse { .. } => "tool_use",
            ServerMessage::ToolResult { .. } => "tool_result",
            ServerMessage::PermissionRequest { .. } => "permission_request",
            ServerMessage::SessionEnd { .. } => "session_end",
            ServerMessage::GreetingStart => "greeting_start",
            ServerMessage::Error { .. } => "error",
        }
    }
}

impl From<&DecodeError> for ServerMessage {
    fn from(err: &DecodeError) -> Self {
        ServerMessage::error(err.to_string())
    }
}
