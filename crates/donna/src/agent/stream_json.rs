//! Claude CLI stream-json message types.
//!
//! The CLI reads and writes one JSON object per line. Inbound lines are parsed
//! into [`CliMessage`]; outbound lines are built by the `*_line` helpers.

use donna_protocol::{AgentEvent, SessionStats, ToolResultContent};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::permission::{DENY_MESSAGE, PermissionDecision};

/// Callback id of the PostToolUse hook registered at initialize.
pub const CONTEXT_NUDGE_CALLBACK_ID: &str = "context_nudge";

/// Tools whose completion triggers the context nudge.
pub const CONTEXT_NUDGE_MATCHER: &str = "Read|Write|Edit";

pub const CONTEXT_NUDGE_MESSAGE: &str = "A file was just read or modified. If you haven't already, \
spawn the context-updater agent in the background to keep current_context.md up to date with \
what the user is focused on.";

/// A line read from the CLI's stdout.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CliMessage {
    Assistant {
        message: MessageBody,
        #[serde(default)]
        parent_tool_use_id: Option<String>,
    },
    User {
        message: MessageBody,
        #[serde(default)]
        parent_tool_use_id: Option<String>,
    },
    Result(ResultBody),
    System {
        #[serde(default)]
        subtype: Option<String>,
    },
    ControlRequest {
        request_id: String,
        request: ControlRequest,
    },
    ControlResponse {
        response: ControlResponse,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageBody {
    pub content: MessageContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<ToolResultContent>,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultBody {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequest {
    CanUseTool {
        tool_name: String,
        #[serde(default)]
        input: Value,
    },
    HookCallback {
        callback_id: String,
        #[serde(default)]
        input: Value,
        #[serde(default)]
        tool_use_id: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlResponse {
    pub subtype: String,
    pub request_id: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn is_success(&self) -> bool {
        self.subtype == "success"
    }
}

impl CliMessage {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Agent events carried by this message, in order.
    pub fn into_events(self) -> Vec<AgentEvent> {
        match self {
            CliMessage::Assistant {
                message,
                parent_tool_use_id,
            }
            | CliMessage::User {
                message,
                parent_tool_use_id,
            } => match message.content {
                MessageContent::Blocks(blocks) => blocks
                    .into_iter()
                    .filter_map(|block| block_event(block, parent_tool_use_id.as_deref()))
                    .collect(),
                // Plain-string user content is our own prompt echoed back.
                MessageContent::Text(_) => Vec::new(),
            },
            CliMessage::Result(result) => vec![AgentEvent::SessionStats(SessionStats {
                turns: result.num_turns,
                duration_ms: result.duration_ms,
                cost_usd: result.total_cost_usd,
            })],
            _ => Vec::new(),
        }
    }
}

fn block_event(block: ContentBlock, parent: Option<&str>) -> Option<AgentEvent> {
    let parent_id = parent.map(str::to_string);
    match block {
        ContentBlock::Text { text } => Some(AgentEvent::Text { content: text }),
        ContentBlock::Thinking { thinking } => Some(AgentEvent::Thinking { content: thinking }),
        ContentBlock::ToolUse { id, name, input } => Some(AgentEvent::ToolUse {
            id,
            name,
            input,
            parent_id,
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(AgentEvent::ToolResult {
            tool_use_id,
            content: content.unwrap_or_default(),
            is_error: is_error.unwrap_or(false),
            parent_id,
        }),
        ContentBlock::Other => None,
    }
}

pub fn user_message_line(text: &str) -> Value {
    json!({
        "type": "user",
        "message": {"role": "user", "content": text},
        "parent_tool_use_id": null,
        "session_id": "default",
    })
}

pub fn control_request_line(request_id: &str, request: Value) -> Value {
    json!({
        "type": "control_request",
        "request_id": request_id,
        "request": request,
    })
}

/// Initialize request registering the PostToolUse context nudge.
pub fn initialize_request() -> Value {
    json!({
        "subtype": "initialize",
        "hooks": {
            "PostToolUse": [{
                "matcher": CONTEXT_NUDGE_MATCHER,
                "hookCallbackIds": [CONTEXT_NUDGE_CALLBACK_ID],
            }],
        },
    })
}

/// Answer to a `hook_callback` control request. Unknown callbacks get an empty output.
pub fn hook_response_line(request_id: &str, callback_id: &str) -> Value {
    let output = if callback_id == CONTEXT_NUDGE_CALLBACK_ID {
        json!({"systemMessage": CONTEXT_NUDGE_MESSAGE})
    } else {
        json!({})
    };
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": output,
        },
    })
}

/// Answer to a `can_use_tool` control request.
pub fn permission_response_line(
    request_id: &str,
    decision: PermissionDecision,
    input: &Value,
) -> Value {
    let response = match decision {
        PermissionDecision::Allow => json!({"behavior": "allow", "updatedInput": input}),
        PermissionDecision::Deny => json!({"behavior": "deny", "message": DENY_MESSAGE}),
    };
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": response,
        },
    })
}

pub fn control_error_line(request_id: &str, message: &str) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "error",
            "request_id": request_id,
            "error": message,
        },
    })
}
