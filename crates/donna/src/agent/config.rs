//! Agent configuration.

use serde::{Deserialize, Serialize};

/// Agent settings, the `[agent]` section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Path or name of the `claude` executable.
    pub executable: String,

    /// Model alias passed to the runtime ("opus", "sonnet", "haiku").
    pub model: Option<String>,

    /// Extended thinking budget. Unset disables thinking.
    pub max_thinking_tokens: Option<u32>,

    pub max_turns: Option<u32>,

    /// Spending limit per session in USD.
    pub max_budget_usd: Option<f64>,

    /// Tools the agent may use at all.
    pub allowed_tools: Vec<String>,

    /// Tools that run without asking the user.
    pub auto_allowed_tools: Vec<String>,

    /// Seconds a permission prompt may stay unanswered before it is denied.
    pub permission_timeout_secs: u64,

    /// Seconds to wait for the runtime's initialize handshake.
    pub handshake_timeout_secs: u64,

    /// Send a greeting (or onboarding) instruction when a session starts.
    pub auto_greet: bool,

    /// Replaces the built-in system prompt when set.
    pub prompt_file: Option<String>,

    /// Copied into an empty data directory for new users.
    pub template_dir: Option<String>,

    /// Working directory of the runtime process. Defaults to the data directory.
    pub work_dir: Option<String>,

    pub setting_sources: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            executable: "claude".to_string(),
            model: Some("opus".to_string()),
            max_thinking_tokens: Some(10_000),
            max_turns: None,
            max_budget_usd: None,
            allowed_tools: ["Read", "Write", "Edit", "Skill", "Grep", "Glob", "Task"]
                .into_iter()
                .map(String::from)
                .collect(),
            auto_allowed_tools: crate::permission::DEFAULT_AUTO_ALLOWED_TOOLS
                .iter()
                .map(|tool| tool.to_string())
                .collect(),
            permission_timeout_secs: 300,
            handshake_timeout_secs: 60,
            auto_greet: true,
            prompt_file: None,
            template_dir: None,
            work_dir: None,
            setting_sources: vec!["project".to_string()],
        }
    }
}
