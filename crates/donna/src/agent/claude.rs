//! Claude CLI runtime.
//!
//! Spawns `claude` in stream-json mode and drives it over stdio: a writer task
//! owns stdin, a reader task translates stdout lines into [`AgentEvent`]s and
//! answers permission callbacks, and a third task forwards stderr to the log.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use donna_protocol::AgentEvent;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::config::AgentConfig;
use super::stream_json::{
    CliMessage, ControlRequest, ControlResponse, ResultBody, control_error_line, control_request_line,
    hook_response_line, initialize_request, permission_response_line, user_message_line,
};
use super::{AgentConnection, AgentRuntime, PermissionHandler, RuntimeError, RuntimeOptions};

type PendingResponses = Arc<Mutex<HashMap<String, oneshot::Sender<ControlResponse>>>>;
type EventSender = mpsc::UnboundedSender<Result<AgentEvent, RuntimeError>>;

/// How long `close` waits for the process to exit after stdin is closed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Runtime backed by the `claude` executable.
#[derive(Debug, Clone)]
pub struct ClaudeCliRuntime {
    executable: String,
    handshake_timeout: Duration,
    env: HashMap<String, String>,
}

impl ClaudeCliRuntime {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            handshake_timeout: Duration::from_secs(60),
            env: HashMap::new(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(&config.executable)
            .with_handshake_timeout(Duration::from_secs(config.handshake_timeout_secs))
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn command(&self, options: &RuntimeOptions) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args([
            "--output-format",
            "stream-json",
            "--input-format",
            "stream-json",
            "--verbose",
            "--permission-prompt-tool",
            "stdio",
        ]);
        cmd.arg("--system-prompt").arg(&options.system_prompt);

        if !options.allowed_tools.is_empty() {
            cmd.arg("--allowedTools")
                .arg(options.allowed_tools.join(","));
        }
        if let Some(ref model) = options.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(max_turns) = options.max_turns {
            cmd.arg("--max-turns").arg(max_turns.to_string());
        }
        if let Some(budget) = options.max_budget_usd {
            cmd.arg("--max-budget-usd").arg(budget.to_string());
        }
        if !options.setting_sources.is_empty() {
            cmd.arg("--setting-sources")
                .arg(options.setting_sources.join(","));
        }
        if let Some(ref dir) = options.work_dir {
            cmd.current_dir(dir);
        }
        if let Some(tokens) = options.max_thinking_tokens {
            cmd.env("MAX_THINKING_TOKENS", tokens.to_string());
        }
        cmd.envs(&self.env);

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AgentRuntime for ClaudeCliRuntime {
    async fn open(
        &self,
        options: RuntimeOptions,
        permissions: Arc<dyn PermissionHandler>,
    ) -> Result<Box<dyn AgentConnection>, RuntimeError> {
        info!(
            "Spawning {} (model={:?}, work_dir={:?})",
            self.executable, options.model, options.work_dir
        );

        let child = self
            .command(&options)
            .spawn()
            .map_err(|e| RuntimeError::Spawn(format!("{}: {e}", self.executable)))?;

        let mut connection = ClaudeCliConnection::new(child, permissions)?;
        if let Err(err) = connection.initialize(self.handshake_timeout).await {
            connection.shutdown().await;
            return Err(err);
        }
        Ok(Box::new(connection))
    }
}

/// A running `claude` process.
pub struct ClaudeCliConnection {
    child: Child,
    line_tx: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedReceiver<Result<AgentEvent, RuntimeError>>,
    pending_responses: PendingResponses,
    request_counter: u64,
    stdin_handle: JoinHandle<()>,
    _handles: Vec<JoinHandle<()>>,
}

impl ClaudeCliConnection {
    fn new(mut child: Child, permissions: Arc<dyn PermissionHandler>) -> Result<Self, RuntimeError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::Spawn("claude process has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Spawn("claude process has no stdout".to_string()))?;

        let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, events) = mpsc::unbounded_channel();
        let pending_responses: PendingResponses = Arc::new(Mutex::new(HashMap::new()));

        let stdin_handle = tokio::spawn(stdin_writer_task(stdin, line_rx));
        let mut handles = vec![tokio::spawn(stdout_reader_task(
            stdout,
            event_tx,
            line_tx.clone(),
            Arc::clone(&pending_responses),
            permissions,
        ))];
        if let Some(stderr) = child.stderr.take() {
            handles.push(tokio::spawn(stderr_reader_task(stderr)));
        }

        Ok(Self {
            child,
            line_tx,
            events,
            pending_responses,
            request_counter: 0,
            stdin_handle,
            _handles: handles,
        })
    }

    fn next_request_id(&mut self) -> String {
        self.request_counter += 1;
        format!("req_{}", self.request_counter)
    }

    fn send_line(&self, value: &Value) -> Result<(), RuntimeError> {
        self.line_tx
            .send(value.to_string())
            .map_err(|_| RuntimeError::Closed)
    }

    async fn initialize(&mut self, timeout: Duration) -> Result<(), RuntimeError> {
        let request_id = self.next_request_id();
        let (response_tx, response_rx) = oneshot::channel();
        self.pending_responses
            .lock()
            .await
            .insert(request_id.clone(), response_tx);

        self.send_line(&control_request_line(&request_id, initialize_request()))?;

        let response = tokio::time::timeout(timeout, response_rx)
            .await
            .map_err(|_| {
                RuntimeError::Handshake(format!("no initialize response within {timeout:?}"))
            })?
            .map_err(|_| RuntimeError::Handshake("process exited during initialize".to_string()))?;

        if !response.is_success() {
            return Err(RuntimeError::Handshake(
                response
                    .error
                    .unwrap_or_else(|| "initialize rejected".to_string()),
            ));
        }
        debug!("claude initialize handshake complete");
        Ok(())
    }

    async fn shutdown(&mut self) {
        // Dropping stdin tells the CLI to finish.
        self.stdin_handle.abort();
        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!("claude exited with {status}"),
            Ok(Err(e)) => warn!("Failed to wait for claude process: {e}"),
            Err(_) => {
                warn!("claude did not exit within {EXIT_GRACE:?}, killing it");
                if let Err(e) = self.child.kill().await {
                    error!("Failed to kill claude process: {e}");
                }
            }
        }
    }
}

#[async_trait]
impl AgentConnection for ClaudeCliConnection {
    async fn submit(&mut self, text: &str) -> Result<(), RuntimeError> {
        self.send_line(&user_message_line(text))
    }

    fn drain_turn(&mut self) -> BoxStream<'_, Result<AgentEvent, RuntimeError>> {
        stream::unfold(
            (&mut self.events, false),
            |(events, finished)| async move {
                if finished {
                    return None;
                }
                match events.recv().await {
                    Some(Ok(event)) => {
                        let finished = event.is_terminal();
                        Some((Ok(event), (events, finished)))
                    }
                    Some(Err(err)) => Some((Err(err), (events, true))),
                    None => Some((Err(RuntimeError::Closed), (events, true))),
                }
            },
        )
        .boxed()
    }

    async fn close(&mut self) -> Result<(), RuntimeError> {
        self.shutdown().await;
        Ok(())
    }
}

async fn stdin_writer_task(mut stdin: ChildStdin, mut line_rx: mpsc::UnboundedReceiver<String>) {
    info!("claude stdin writer task started");
    while let Some(line) = line_rx.recv().await {
        let display: String = line.chars().take(200).collect();
        debug!("Sending to claude: {display}");
        if let Err(e) = stdin.write_all(format!("{line}\n").as_bytes()).await {
            error!("Failed to write to claude stdin: {e:?}");
            break;
        }
        if let Err(e) = stdin.flush().await {
            error!("Failed to flush claude stdin: {e:?}");
            break;
        }
    }
    info!("claude stdin writer task ended");
}

async fn stdout_reader_task(
    stdout: ChildStdout,
    event_tx: EventSender,
    line_tx: mpsc::UnboundedSender<String>,
    pending_responses: PendingResponses,
    permissions: Arc<dyn PermissionHandler>,
) {
    let mut lines = BufReader::new(stdout).lines();
    info!("claude stdout reader task started");

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                let _ = event_tx.send(Err(RuntimeError::Io(e)));
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let display: String = line.chars().take(200).collect();
        debug!("Received from claude: {display}");

        let message = match CliMessage::parse(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to parse claude message: {e:?}, line: {display}");
                continue;
            }
        };

        match message {
            CliMessage::ControlRequest {
                request_id,
                request: ControlRequest::CanUseTool { tool_name, input },
            } => {
                let permissions = Arc::clone(&permissions);
                let line_tx = line_tx.clone();
                tokio::spawn(async move {
                    let decision = permissions.can_use_tool(&tool_name, &input).await;
                    debug!("Permission for {tool_name}: {decision:?}");
                    let reply = permission_response_line(&request_id, decision, &input);
                    if line_tx.send(reply.to_string()).is_err() {
                        warn!("claude stdin closed before permission reply for {tool_name}");
                    }
                });
            }
            CliMessage::ControlRequest {
                request_id,
                request: ControlRequest::HookCallback { callback_id, .. },
            } => {
                debug!("Hook callback {callback_id} for request {request_id}");
                let reply = hook_response_line(&request_id, &callback_id);
                if line_tx.send(reply.to_string()).is_err() {
                    warn!("claude stdin closed before hook reply {request_id}");
                }
            }
            CliMessage::ControlRequest { request_id, .. } => {
                warn!("Unsupported control request {request_id}");
                let reply = control_error_line(&request_id, "unsupported control request");
                let _ = line_tx.send(reply.to_string());
            }
            CliMessage::ControlResponse { response } => {
                let mut pending = pending_responses.lock().await;
                if let Some(tx) = pending.remove(&response.request_id) {
                    let _ = tx.send(response);
                } else {
                    warn!(
                        "Received control response for unknown request ID: {}",
                        response.request_id
                    );
                }
            }
            other => {
                if let CliMessage::Result(result @ ResultBody { is_error: true, .. }) = &other {
                    warn!(
                        "claude turn ended with error ({}): {}",
                        result.subtype,
                        result.result.as_deref().unwrap_or("no details")
                    );
                }
                forward_events(&event_tx, other);
            }
        }
    }

    // Fail any handshake still waiting.
    pending_responses.lock().await.clear();
    info!("claude stdout reader task ended");
}

fn forward_events(event_tx: &EventSender, message: CliMessage) {
    for event in message.into_events() {
        if event_tx.send(Ok(event)).is_err() {
            return;
        }
    }
}

async fn stderr_reader_task(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            warn!("claude stderr: {line}");
        }
    }
    info!("claude stderr reader task ended");
}
