//! Agent event types.
//!
//! Events are produced by the runtime collaborator while it works on one turn and
//! consumed by whichever front-end drains the session. They are immutable once
//! constructed; shaping for the wire happens in the bridge.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder text the runtime emits for content-less assistant blocks.
pub const PLACEHOLDER_TEXT: &str = "(no content)";

/// One event of a turn, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A chunk of final-answer text.
    Text { content: String },

    /// A chunk of internal reasoning.
    Thinking { content: String },

    /// A requested tool invocation.
    ToolUse {
        id: String,
        name: String,
        input: Value,
        /// Set when the invocation was made by a sub-agent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
    },

    /// Outcome of a tool invocation.
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
    },

    /// Terminal summary of one turn. Always the last event of a turn.
    SessionStats(SessionStats),
}

impl AgentEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    /// True for text events that carry nothing worth showing.
    pub fn is_placeholder_text(&self) -> bool {
        match self {
            Self::Text { content } => {
                let trimmed = content.trim();
                trimmed.is_empty() || trimmed == PLACEHOLDER_TEXT
            }
            _ => false,
        }
    }

    /// True for the event that ends a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionStats(_))
    }
}

/// Completion statistics reported by the runtime for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub turns: u32,
    pub duration_ms: u64,
    pub cost_usd: Option<f64>,
}

/// Tool result payload: either plain text or a list of content parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Parts(Vec<Value>),
}

impl Default for ToolResultContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl ToolResultContent {
    /// Collapse the content to a single string.
    ///
    /// Parts with a `text` field contribute that text; any other part is rendered
    /// in its default string form. Parts are joined with newlines.
    pub fn flatten(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    Value::Object(map) => match map.get("text") {
                        Some(Value::String(text)) => text.clone(),
                        Some(other) => other.to_string(),
                        None => part.to_string(),
                    },
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for ToolResultContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ToolResultContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_placeholder_text_detection() {
        assert!(AgentEvent::text("").is_placeholder_text());
        assert!(AgentEvent::text("   \n").is_placeholder_text());
        assert!(AgentEvent::text(" (no content) ").is_placeholder_text());
        assert!(!AgentEvent::text("noted").is_placeholder_text());
        assert!(
            !AgentEvent::Thinking {
                content: String::new()
            }
            .is_placeholder_text()
        );
    }

    #[test]
    fn test_flatten_text_parts() {
        let content = ToolResultContent::Parts(vec![
            json!({"type": "text", "text": "line one"}),
            json!({"type": "image", "source": "x"}),
            json!("bare"),
            json!({"type": "text", "text": "line two"}),
        ]);

        let flat = content.flatten();
        let lines: Vec<&str> = flat.lines().collect();
        assert_eq!(lines[0], "line one");
        assert!(lines[1].contains("\"image\""));
        assert_eq!(lines[2], "bare");
        assert_eq!(lines[3], "line two");
    }

    #[test]
    fn test_flatten_plain_text() {
        assert_eq!(ToolResultContent::from("ok").flatten(), "ok");
        assert_eq!(ToolResultContent::default().flatten(), "");
    }

    #[test]
    fn test_tool_result_content_deserializes_both_shapes() {
        let text: ToolResultContent = serde_json::from_value(json!("done")).unwrap();
        assert_eq!(text, ToolResultContent::Text("done".to_string()));

        let parts: ToolResultContent =
            serde_json::from_value(json!([{"type": "text", "text": "a"}])).unwrap();
        assert_eq!(parts.flatten(), "a");
    }

    #[test]
    fn test_stats_is_terminal() {
        let stats = AgentEvent::SessionStats(SessionStats {
            turns: 1,
            duration_ms: 10,
            cost_usd: None,
        });
        assert!(stats.is_terminal());
        assert!(!AgentEvent::text("hi").is_terminal());
    }
}
