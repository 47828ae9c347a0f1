//! Per-session JSONL transcripts.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, SecondsFormat, Utc};
use donna_protocol::AgentEvent;
use serde_json::{Value, json};
use tracing::warn;

/// Append-only log of one session. Write failures are logged, never returned.
#[derive(Debug, Clone)]
pub struct Transcript {
    path: PathBuf,
}

impl Transcript {
    /// Start a new transcript file in `dir`.
    pub fn create(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let name = format!("{}.jsonl", Local::now().format("%Y%m%d_%H%M%S"));
        Ok(Self {
            path: dir.join(name),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, entry_type: &str, data: Value) {
        let mut entry = json!({
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "type": entry_type,
        });
        if let (Some(entry), Value::Object(fields)) = (entry.as_object_mut(), data) {
            entry.extend(fields);
        }

        if let Err(err) = self.append(&entry) {
            warn!("Failed to write transcript {}: {err}", self.path.display());
        }
    }

    pub fn log_user_message(&self, text: &str) {
        self.log("user_message", json!({ "text": text }));
    }

    /// Record one runtime event. Placeholder text is skipped.
    pub fn log_event(&self, event: &AgentEvent) {
        let block = match event {
            AgentEvent::SessionStats(stats) => {
                self.log(
                    "result",
                    json!({
                        "num_turns": stats.turns,
                        "duration_ms": stats.duration_ms,
                        "total_cost_usd": stats.cost_usd,
                    }),
                );
                return;
            }
            _ if event.is_placeholder_text() => return,
            AgentEvent::Text { content } => json!({"type": "text", "text": content}),
            AgentEvent::Thinking { content } => json!({"type": "thinking", "thinking": content}),
            AgentEvent::ToolUse {
                id, name, input, ..
            } => json!({"type": "tool_use", "id": id, "name": name, "input": input}),
            AgentEvent::ToolResult {
                tool_use_id,
                content,
                is_error,
                ..
            } => json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content.flatten(),
                "is_error": is_error,
            }),
        };
        self.log("assistant_message", json!({ "content": [block] }));
    }

    fn append(&self, entry: &Value) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{entry}")
    }
}
