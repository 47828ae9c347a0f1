//! Connection lifecycle between a chat client and a session.
//!
//! The bridge enters the session, forwards the greeting turn, then dispatches
//! client messages until the client leaves. While a turn is being forwarded and
//! the runtime waits on a tool permission, the bridge reads the transport itself
//! and accepts only the client's decision.

use std::sync::Arc;

use donna_protocol::{AgentEvent, ClientMessage, ServerMessage};
use futures::StreamExt;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::transport::{ChatTransport, TransportError};
use crate::permission::{PermissionBroker, PermissionDecision, PermissionRequest};
use crate::session::{SessionError, SessionEvent, SessionOrchestrator};

/// What the bridge is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Draining,
    AwaitingPermission,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("client disconnected")]
    Disconnected,
}

impl BridgeError {
    /// Error text worth sending to the client, if the client can still hear it.
    pub fn client_message(&self) -> Option<String> {
        match self {
            BridgeError::Session(err) => Some(err.user_message()),
            BridgeError::Transport(_) | BridgeError::Disconnected => None,
        }
    }
}

pub struct ChatBridge<T> {
    transport: T,
    verbose: bool,
    timezone: Option<String>,
    state: BridgeState,
}

impl<T: ChatTransport> ChatBridge<T> {
    pub fn new(transport: T, verbose: bool) -> Self {
        Self {
            transport,
            verbose,
            timezone: None,
            state: BridgeState::Idle,
        }
    }

    /// Timezone hint supplied by the client at connect time.
    pub fn with_timezone(mut self, timezone: Option<String>) -> Self {
        self.timezone = timezone.filter(|tz| !tz.trim().is_empty());
        self
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Run the connection to completion. The session is always exited.
    pub async fn run(mut self, mut session: SessionOrchestrator) -> Result<(), BridgeError> {
        let result = self.serve(&mut session).await;

        let result = match result {
            Err(BridgeError::Disconnected) => Ok(()),
            other => other,
        };
        if let Err(err) = &result {
            error!(session = %session.id(), "Chat connection failed: {err}");
            if let Some(message) = err.client_message() {
                if let Err(send_err) = self.transport.send(&ServerMessage::error(message)).await {
                    debug!("Could not report error to client: {send_err}");
                }
            }
        }

        session.exit().await;
        self.state = BridgeState::Idle;
        info!(session = %session.id(), "Chat connection closed");
        result
    }

    async fn serve(&mut self, session: &mut SessionOrchestrator) -> Result<(), BridgeError> {
        session.enter(self.timezone.as_deref()).await?;

        if session.greeting_sent() {
            self.transport.send(&ServerMessage::GreetingStart).await?;
            self.forward_turn(session).await?;
        }

        loop {
            let Some(frame) = self.transport.recv().await else {
                debug!(session = %session.id(), "Client went away");
                return Ok(());
            };
            let frame = frame?;

            let message = match ClientMessage::decode(&frame) {
                Ok(message) => message,
                Err(err) => {
                    debug!(session = %session.id(), "Rejected client frame: {err}");
                    self.transport.send(&ServerMessage::from(&err)).await?;
                    continue;
                }
            };

            match message {
                ClientMessage::Message { content, dev_mode } => {
                    if let Some(dev_mode) = dev_mode {
                        self.verbose = dev_mode;
                    }
                    if content.is_empty() {
                        debug!(session = %session.id(), "Skipping blank message");
                        continue;
                    }
                    session.send(&content).await?;
                    self.forward_turn(session).await?;
                }
                ClientMessage::PermissionResponse { allowed } => {
                    // Nothing is pending outside a turn; the broker ignores it.
                    session
                        .broker()
                        .resolve(PermissionDecision::from_allowed(allowed));
                }
                ClientMessage::Disconnect => {
                    debug!(session = %session.id(), "Client requested disconnect");
                    return Ok(());
                }
            }
        }
    }

    async fn forward_turn(&mut self, session: &mut SessionOrchestrator) -> Result<(), BridgeError> {
        let broker = session.broker();
        let mut turn = session.stream_response()?;
        self.state = BridgeState::Draining;

        while let Some(item) = turn.next().await {
            match item? {
                SessionEvent::Agent(event) => {
                    if let Some(message) = shape_event(event, self.verbose) {
                        self.transport.send(&message).await?;
                    }
                }
                SessionEvent::PermissionRequested(request) => {
                    self.await_permission(&broker, request).await?;
                }
            }
        }

        self.state = BridgeState::Idle;
        Ok(())
    }

    async fn await_permission(
        &mut self,
        broker: &Arc<PermissionBroker>,
        request: PermissionRequest,
    ) -> Result<(), BridgeError> {
        self.transport
            .send(&ServerMessage::PermissionRequest {
                tool: request.tool_name.clone(),
                input: request.tool_input.clone(),
            })
            .await?;
        self.state = BridgeState::AwaitingPermission;

        let deadline = Instant::now() + broker.timeout();
        let outcome = loop {
            let frame = match tokio::time::timeout_at(deadline, self.transport.recv()).await {
                Err(_) => {
                    warn!(tool = %request.tool_name, "No permission answer before timeout, denying");
                    broker.resolve(PermissionDecision::Deny);
                    break Ok(());
                }
                Ok(None) => {
                    broker.resolve(PermissionDecision::Deny);
                    break Err(BridgeError::Disconnected);
                }
                Ok(Some(Err(err))) => {
                    broker.resolve(PermissionDecision::Deny);
                    break Err(err.into());
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match ClientMessage::decode(&frame) {
                Ok(ClientMessage::PermissionResponse { allowed }) => {
                    broker.resolve(PermissionDecision::from_allowed(allowed));
                    break Ok(());
                }
                Ok(other) => {
                    debug!(
                        tool = %request.tool_name,
                        "Dropping {} while awaiting permission",
                        other.kind()
                    );
                }
                Err(err) => {
                    debug!(tool = %request.tool_name, "Dropping undecodable frame while awaiting permission: {err}");
                }
            }
        };

        self.state = BridgeState::Draining;
        outcome
    }
}

/// Wire shape of an agent event, or `None` if the client should not see it.
///
/// Placeholder text is dropped. Thinking and tool traffic only reach verbose
/// clients.
pub fn shape_event(event: AgentEvent, verbose: bool) -> Option<ServerMessage> {
    if event.is_placeholder_text() {
        return None;
    }
    match event {
        AgentEvent::Text { content } => Some(ServerMessage::Text { content }),
        AgentEvent::Thinking { content } => {
            (verbose && !content.is_empty()).then_some(ServerMessage::Thinking { content })
        }
        AgentEvent::ToolUse {
            id,
            name,
            input,
            parent_id,
        } => verbose.then_some(ServerMessage::ToolUse {
            name,
            input,
            tool_id: id,
            parent_tool_use_id: parent_id,
        }),
        AgentEvent::ToolResult {
            tool_use_id,
            content,
            is_error,
            parent_id,
        } => verbose.then(|| ServerMessage::ToolResult {
            content: content.flatten(),
            is_error,
            tool_use_id,
            parent_tool_use_id: parent_id,
        }),
        AgentEvent::SessionStats(stats) => Some(ServerMessage::SessionEnd { stats }),
    }
}
