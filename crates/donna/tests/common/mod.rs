//! Test utilities and common setup.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use donna::agent::{
    AgentConnection, AgentRuntime, PermissionHandler, RuntimeError, RuntimeOptions,
};
use donna::api::{AppState, ServerConfig, create_router};
use donna::auth::{AuthConfig, AuthState};
use donna::permission::{DENY_MESSAGE, PermissionDecision, PermissionPolicy};
use donna::session::profile::PREFERENCES_FILE;
use donna::session::{ProfileStore, SessionConfig, SessionService};
use donna::ws::{ChatTransport, TransportError};
use donna_files::{FileWatchBroadcaster, WatchConfig};
use donna_protocol::{AgentEvent, ServerMessage, SessionStats, ToolResultContent};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const TEST_JWT_SECRET: &str = "test-secret-for-integration-tests-minimum-32-chars";

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Scripted runtime
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Step {
    Emit(AgentEvent),
    /// Consult the permission handler, then emit the tool result.
    Ask {
        tool_use_id: String,
        tool: String,
        input: Value,
    },
}

/// Steps played back for one submitted message.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    steps: Vec<Step>,
}

impl Turn {
    pub fn new() -> Self {
        Self::default()
    }

    /// A plain text answer followed by stats.
    pub fn reply(text: &str) -> Self {
        Self::new().text(text).stats()
    }

    pub fn text(mut self, text: &str) -> Self {
        self.steps.push(Step::Emit(AgentEvent::text(text)));
        self
    }

    pub fn thinking(mut self, text: &str) -> Self {
        self.steps.push(Step::Emit(AgentEvent::Thinking {
            content: text.to_string(),
        }));
        self
    }

    /// Tool call that goes through the permission handler.
    pub fn tool(mut self, id: &str, tool: &str, input: Value) -> Self {
        self.steps.push(Step::Emit(AgentEvent::ToolUse {
            id: id.to_string(),
            name: tool.to_string(),
            input: input.clone(),
            parent_id: None,
        }));
        self.steps.push(Step::Ask {
            tool_use_id: id.to_string(),
            tool: tool.to_string(),
            input,
        });
        self
    }

    pub fn stats(mut self) -> Self {
        self.steps
            .push(Step::Emit(AgentEvent::SessionStats(SessionStats {
                turns: 1,
                duration_ms: 42,
                cost_usd: Some(0.001),
            })));
        self
    }
}

/// What the scripted runtime saw.
#[derive(Debug, Default)]
pub struct ScriptLog {
    pub options: Option<RuntimeOptions>,
    pub submitted: Vec<String>,
    pub decisions: Vec<(String, PermissionDecision)>,
    pub closed: bool,
}

/// [`AgentRuntime`] that plays back pre-recorded turns, one per submit.
#[derive(Clone, Default)]
pub struct ScriptedRuntime {
    turns: Arc<Mutex<VecDeque<Turn>>>,
    log: Arc<Mutex<ScriptLog>>,
    fail_open: bool,
}

impl ScriptedRuntime {
    pub fn new(turns: impl IntoIterator<Item = Turn>) -> Self {
        Self {
            turns: Arc::new(Mutex::new(turns.into_iter().collect())),
            ..Self::default()
        }
    }

    /// A runtime whose `open` always fails.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, ScriptLog> {
        self.log.lock().unwrap()
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn open(
        &self,
        options: RuntimeOptions,
        permissions: Arc<dyn PermissionHandler>,
    ) -> Result<Box<dyn AgentConnection>, RuntimeError> {
        if self.fail_open {
            return Err(RuntimeError::Spawn("claude: command not found".to_string()));
        }
        self.log().options = Some(options);
        Ok(Box::new(ScriptedConnection {
            turns: Arc::clone(&self.turns),
            log: Arc::clone(&self.log),
            permissions,
            current: None,
        }))
    }
}

struct ScriptedConnection {
    turns: Arc<Mutex<VecDeque<Turn>>>,
    log: Arc<Mutex<ScriptLog>>,
    permissions: Arc<dyn PermissionHandler>,
    current: Option<Turn>,
}

struct Playback {
    steps: VecDeque<Step>,
    queued: VecDeque<AgentEvent>,
    permissions: Arc<dyn PermissionHandler>,
    log: Arc<Mutex<ScriptLog>>,
}

#[async_trait]
impl AgentConnection for ScriptedConnection {
    async fn submit(&mut self, text: &str) -> Result<(), RuntimeError> {
        self.log.lock().unwrap().submitted.push(text.to_string());
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Turn::new().stats());
        self.current = Some(turn);
        Ok(())
    }

    fn drain_turn(&mut self) -> BoxStream<'_, Result<AgentEvent, RuntimeError>> {
        let Some(turn) = self.current.take() else {
            return stream::empty().boxed();
        };
        let playback = Playback {
            steps: turn.steps.into(),
            queued: VecDeque::new(),
            permissions: Arc::clone(&self.permissions),
            log: Arc::clone(&self.log),
        };

        stream::unfold(playback, |mut playback| async move {
            loop {
                if let Some(event) = playback.queued.pop_front() {
                    return Some((Ok(event), playback));
                }
                match playback.steps.pop_front()? {
                    Step::Emit(event) => return Some((Ok(event), playback)),
                    Step::Ask {
                        tool_use_id,
                        tool,
                        input,
                    } => {
                        let decision = playback.permissions.can_use_tool(&tool, &input).await;
                        playback
                            .log
                            .lock()
                            .unwrap()
                            .decisions
                            .push((tool.clone(), decision));
                        let content = if decision.is_allowed() {
                            "done"
                        } else {
                            DENY_MESSAGE
                        };
                        playback.queued.push_back(AgentEvent::ToolResult {
                            tool_use_id,
                            content: ToolResultContent::Text(content.to_string()),
                            is_error: !decision.is_allowed(),
                            parent_id: None,
                        });
                    }
                }
            }
        })
        .boxed()
    }

    async fn close(&mut self) -> Result<(), RuntimeError> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Session settings around `data_dir`: no greeting, no transcripts.
pub fn session_config(data_dir: &Path) -> SessionConfig {
    let mut config = SessionConfig::new(ProfileStore::new(data_dir));
    config.auto_greet = false;
    config
}

pub fn with_permission_timeout(mut config: SessionConfig, timeout: Duration) -> SessionConfig {
    config.permission_policy = PermissionPolicy::new(
        config.permission_policy.auto_allowed.iter().cloned(),
        timeout,
    );
    config
}

pub fn write_preferences(data_dir: &Path, body: &str) {
    std::fs::write(data_dir.join(PREFERENCES_FILE), body).unwrap();
}

// ---------------------------------------------------------------------------
// In-memory transport
// ---------------------------------------------------------------------------

/// [`ChatTransport`] backed by channels; the other end is a [`TestClient`].
pub struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    closed_with: Arc<Mutex<Option<(u16, String)>>>,
}

#[async_trait]
impl ChatTransport for ChannelTransport {
    async fn send(&mut self, message: &ServerMessage) -> Result<(), TransportError> {
        self.outbound
            .send(message.clone())
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        *self.closed_with.lock().unwrap() = Some((code, reason.to_string()));
        Ok(())
    }
}

pub struct TestClient {
    to_server: Option<mpsc::UnboundedSender<String>>,
    from_server: mpsc::UnboundedReceiver<ServerMessage>,
    closed_with: Arc<Mutex<Option<(u16, String)>>>,
}

pub fn channel_transport() -> (ChannelTransport, TestClient) {
    let (to_server, inbound) = mpsc::unbounded_channel();
    let (outbound, from_server) = mpsc::unbounded_channel();
    let closed_with = Arc::new(Mutex::new(None));
    (
        ChannelTransport {
            inbound,
            outbound,
            closed_with: Arc::clone(&closed_with),
        },
        TestClient {
            to_server: Some(to_server),
            from_server,
            closed_with,
        },
    )
}

impl TestClient {
    pub fn send_raw(&self, frame: &str) {
        if let Some(tx) = &self.to_server {
            tx.send(frame.to_string()).unwrap();
        }
    }

    pub fn send(&self, value: Value) {
        self.send_raw(&value.to_string());
    }

    pub fn say(&self, content: &str) {
        self.send(json!({ "type": "message", "content": content }));
    }

    pub fn answer_permission(&self, allowed: bool) {
        self.send(json!({ "type": "permission_response", "allowed": allowed }));
    }

    /// Drop the inbound side, as a browser tab closing would.
    pub fn hang_up(&mut self) {
        self.to_server = None;
    }

    pub async fn recv(&mut self) -> Option<ServerMessage> {
        tokio::time::timeout(RECV_TIMEOUT, self.from_server.recv())
            .await
            .expect("timed out waiting for a server message")
    }

    /// Collect messages up to and including `session_end`.
    pub async fn recv_turn(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Some(message) = self.recv().await {
            let done = matches!(message, ServerMessage::SessionEnd { .. });
            messages.push(message);
            if done {
                break;
            }
        }
        messages
    }

    /// Remaining messages once the server side has gone away.
    pub async fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Some(message) = self.recv().await {
            messages.push(message);
        }
        messages
    }

    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.closed_with.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// HTTP app
// ---------------------------------------------------------------------------

pub fn test_auth_config(enabled: bool) -> AuthConfig {
    AuthConfig {
        enabled,
        jwt_secret: Some(TEST_JWT_SECRET.to_string()),
        ..AuthConfig::default()
    }
}

/// Router over a scripted runtime and a temporary data directory.
pub fn test_app_with(runtime: ScriptedRuntime, auth: AuthConfig) -> (Router, TempDir) {
    let data_dir = TempDir::new().unwrap();
    let sessions = SessionService::new(Arc::new(runtime), session_config(data_dir.path()));
    let files = Arc::new(FileWatchBroadcaster::new(
        data_dir.path(),
        &WatchConfig::default(),
    ));
    let state = AppState::new(sessions, AuthState::new(auth), files, false);
    let router = create_router(state, &ServerConfig::default());
    (router, data_dir)
}

pub fn test_app() -> (Router, TempDir) {
    test_app_with(ScriptedRuntime::default(), test_auth_config(false))
}
