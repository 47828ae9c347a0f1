//! Session factory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::orchestrator::SessionOrchestrator;
use super::profile::ProfileStore;
use super::prompt;
use super::transcript::Transcript;
use crate::agent::{AgentConfig, AgentRuntime, RuntimeOptions};
use crate::permission::PermissionPolicy;

/// Settings shared by every session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub profile: ProfileStore,
    pub base_prompt: String,
    pub allowed_tools: Vec<String>,
    pub permission_policy: PermissionPolicy,
    pub auto_greet: bool,
    pub model: Option<String>,
    pub max_thinking_tokens: Option<u32>,
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub work_dir: Option<PathBuf>,
    pub setting_sources: Vec<String>,
    pub template_dir: Option<PathBuf>,
    /// Where JSONL transcripts go. `None` disables them.
    pub transcript_dir: Option<PathBuf>,
}

impl SessionConfig {
    /// Defaults around a data directory: built-in prompt, default tools, no transcripts.
    pub fn new(profile: ProfileStore) -> Self {
        Self::from_agent_config(&AgentConfig::default(), profile)
    }

    /// Build from the `[agent]` config section. Paths must already be expanded.
    pub fn from_agent_config(agent: &AgentConfig, profile: ProfileStore) -> Self {
        let prompt_file = agent.prompt_file.as_ref().map(PathBuf::from);
        Self {
            base_prompt: prompt::load_base_prompt(prompt_file.as_deref()),
            allowed_tools: agent.allowed_tools.clone(),
            permission_policy: PermissionPolicy::new(
                agent.auto_allowed_tools.iter().cloned(),
                Duration::from_secs(agent.permission_timeout_secs),
            ),
            auto_greet: agent.auto_greet,
            model: agent.model.clone(),
            max_thinking_tokens: agent.max_thinking_tokens,
            max_turns: agent.max_turns,
            max_budget_usd: agent.max_budget_usd,
            work_dir: agent.work_dir.as_ref().map(PathBuf::from),
            setting_sources: agent.setting_sources.clone(),
            template_dir: agent.template_dir.as_ref().map(PathBuf::from),
            transcript_dir: None,
            profile,
        }
    }

    pub fn with_transcript_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.transcript_dir = Some(dir.into());
        self
    }

    pub fn runtime_options(&self, system_prompt: String) -> RuntimeOptions {
        RuntimeOptions {
            system_prompt,
            allowed_tools: self.allowed_tools.clone(),
            model: self.model.clone(),
            max_thinking_tokens: self.max_thinking_tokens,
            max_turns: self.max_turns,
            max_budget_usd: self.max_budget_usd,
            work_dir: Some(
                self.work_dir
                    .clone()
                    .unwrap_or_else(|| self.profile.data_dir().to_path_buf()),
            ),
            setting_sources: self.setting_sources.clone(),
        }
    }
}

/// Creates one [`SessionOrchestrator`] per connection.
#[derive(Clone)]
pub struct SessionService {
    runtime: Arc<dyn AgentRuntime>,
    config: Arc<SessionConfig>,
}

impl SessionService {
    pub fn new(runtime: Arc<dyn AgentRuntime>, config: SessionConfig) -> Self {
        Self {
            runtime,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn create(&self) -> SessionOrchestrator {
        let transcript = self.config.transcript_dir.as_deref().and_then(|dir| {
            Transcript::create(dir)
                .map_err(|err| warn!("Transcripts disabled for this session: {err}"))
                .ok()
        });
        SessionOrchestrator::new(
            Arc::clone(&self.runtime),
            Arc::clone(&self.config),
            transcript,
        )
    }
}
