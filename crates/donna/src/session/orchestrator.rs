//! One conversation with the agent runtime.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use donna_protocol::AgentEvent;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::SessionError;
use super::service::SessionConfig;
use super::transcript::Transcript;
use super::{prompt, temporal};
use crate::agent::{AgentConnection, AgentRuntime, RuntimeError};
use crate::permission::{
    BrokeredPermissions, PermissionBroker, PermissionDecision, PermissionPrompts,
    PermissionRequest,
};

/// Item of a turn stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Agent(AgentEvent),
    /// The runtime is waiting on a decision; answer it through the broker.
    PermissionRequested(PermissionRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Entered,
    Exited,
}

pub struct SessionOrchestrator {
    id: String,
    runtime: Arc<dyn AgentRuntime>,
    config: Arc<SessionConfig>,
    broker: Arc<PermissionBroker>,
    prompts: PermissionPrompts,
    connection: Option<Box<dyn AgentConnection>>,
    phase: Phase,
    greeting_sent: bool,
    turn_open: bool,
    transcript: Option<Transcript>,
}

impl SessionOrchestrator {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        config: Arc<SessionConfig>,
        transcript: Option<Transcript>,
    ) -> Self {
        let (broker, prompts) = PermissionBroker::new(config.permission_policy.clone());
        Self {
            id: Uuid::new_v4().to_string(),
            runtime,
            config,
            broker,
            prompts,
            connection: None,
            phase: Phase::Created,
            greeting_sent: false,
            turn_open: false,
            transcript,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn broker(&self) -> Arc<PermissionBroker> {
        Arc::clone(&self.broker)
    }

    pub fn greeting_sent(&self) -> bool {
        self.greeting_sent
    }

    pub fn is_entered(&self) -> bool {
        self.phase == Phase::Entered
    }

    pub fn transcript(&self) -> Option<&Transcript> {
        self.transcript.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open the runtime with the assembled system prompt and, if configured,
    /// send the opening instruction.
    pub async fn enter(&mut self, timezone_hint: Option<&str>) -> Result<(), SessionError> {
        match self.phase {
            Phase::Created => {}
            Phase::Entered => return Err(SessionError::ProtocolMisuse("session entered twice")),
            Phase::Exited => {
                return Err(SessionError::ProtocolMisuse("session entered after exit"));
            }
        }

        let profile = &self.config.profile;
        let stored_zone = profile.stored_timezone();
        let (zone, source) = temporal::resolve_timezone(timezone_hint, stored_zone.as_deref());
        debug!(session = %self.id, zone = zone.name(), ?source, "Resolved session timezone");

        let system_prompt = prompt::build_system_prompt(
            &self.config.base_prompt,
            &temporal::current_date_context(zone),
            profile.preferences_raw().as_deref(),
            &profile.current_context(),
        );

        let options = self.config.runtime_options(system_prompt.clone());
        let permissions = Arc::new(BrokeredPermissions::new(Arc::clone(&self.broker)));
        let connection = match self.runtime.open(options, permissions).await {
            Ok(connection) => connection,
            Err(err) => {
                self.phase = Phase::Exited;
                return Err(SessionError::Initialization(err));
            }
        };
        self.connection = Some(connection);
        self.phase = Phase::Entered;
        info!(session = %self.id, "Session entered");

        if let Some(transcript) = &self.transcript {
            transcript.log("system_prompt", json!({ "prompt": system_prompt }));
        }

        if self.config.auto_greet {
            // Decided before seeding; a template may carry a placeholder name.
            let new_user = profile.is_new_user();
            if new_user {
                if let Err(err) = profile.ensure_initialized(self.config.template_dir.as_deref()) {
                    warn!(session = %self.id, "Failed to initialize data directory: {err}");
                }
            }
            let opening = prompt::opening_prompt(profile, new_user);
            self.submit(&opening).await?;
            self.greeting_sent = true;
        }
        Ok(())
    }

    /// Forward one user utterance as a new turn.
    pub async fn send(&mut self, text: &str) -> Result<(), SessionError> {
        if self.phase != Phase::Entered {
            return Err(SessionError::NotEntered);
        }
        if self.turn_open {
            self.discard_open_turn().await?;
        }
        self.submit(text).await
    }

    /// Drain the current turn.
    ///
    /// Yields runtime events in order, interleaved with permission prompts, and
    /// ends right after `SessionStats`. Returns an empty stream when no turn is
    /// open.
    pub fn stream_response(&mut self) -> Result<TurnStream<'_>, SessionError> {
        if self.phase != Phase::Entered {
            return Err(SessionError::NotEntered);
        }
        let connection = self.connection.as_mut().ok_or(SessionError::NotEntered)?;
        if !self.turn_open {
            return Ok(TurnStream {
                inner: stream::empty().boxed(),
            });
        }

        let state = TurnState {
            events: connection.drain_turn(),
            prompts: &mut self.prompts,
            broker: &self.broker,
            turn_open: &mut self.turn_open,
            transcript: self.transcript.as_ref(),
            done: false,
        };
        Ok(TurnStream {
            inner: stream::unfold(state, next_turn_item).boxed(),
        })
    }

    /// Close the runtime. Safe to call more than once.
    pub async fn exit(&mut self) {
        if self.phase == Phase::Exited && self.connection.is_none() {
            return;
        }
        self.phase = Phase::Exited;
        self.broker.cancel();

        if let Some(mut connection) = self.connection.take() {
            if let Err(err) = connection.close().await {
                warn!(session = %self.id, "Failed to close agent connection: {err}");
            }
        }
        self.turn_open = false;
        info!(session = %self.id, "Session exited");
    }

    async fn submit(&mut self, text: &str) -> Result<(), SessionError> {
        let connection = self.connection.as_mut().ok_or(SessionError::NotEntered)?;
        if let Some(transcript) = &self.transcript {
            transcript.log_user_message(text);
        }
        connection.submit(text).await.map_err(SessionError::Runtime)?;
        self.turn_open = true;
        Ok(())
    }

    /// Throw away the rest of an abandoned turn, denying any prompt it raises.
    async fn discard_open_turn(&mut self) -> Result<(), SessionError> {
        let broker = Arc::clone(&self.broker);
        let mut discarded = 0usize;
        let mut turn = self.stream_response()?;
        while let Some(item) = turn.next().await {
            match item? {
                SessionEvent::Agent(_) => discarded += 1,
                SessionEvent::PermissionRequested(request) => {
                    debug!(tool = %request.tool_name, "Denying permission from abandoned turn");
                    broker.resolve(PermissionDecision::Deny);
                }
            }
        }
        drop(turn);
        warn!(session = %self.id, discarded, "Discarded leftover events of an abandoned turn");
        Ok(())
    }
}

/// Stream returned by [`SessionOrchestrator::stream_response`].
pub struct TurnStream<'a> {
    inner: BoxStream<'a, Result<SessionEvent, SessionError>>,
}

impl Stream for TurnStream<'_> {
    type Item = Result<SessionEvent, SessionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

struct TurnState<'a> {
    events: BoxStream<'a, Result<AgentEvent, RuntimeError>>,
    prompts: &'a mut PermissionPrompts,
    broker: &'a PermissionBroker,
    turn_open: &'a mut bool,
    transcript: Option<&'a Transcript>,
    done: bool,
}

impl TurnState<'_> {
    fn finish(&mut self) {
        self.done = true;
        *self.turn_open = false;
    }
}

async fn next_turn_item<'a>(
    mut state: TurnState<'a>,
) -> Option<(Result<SessionEvent, SessionError>, TurnState<'a>)> {
    if state.done {
        return None;
    }

    loop {
        tokio::select! {
            biased;

            Some(request) = state.prompts.recv() => {
                // The runtime may have given up on it already.
                if !state.broker.has_pending() {
                    debug!(tool = %request.tool_name, "Skipping stale permission prompt");
                    continue;
                }
                return Some((Ok(SessionEvent::PermissionRequested(request)), state));
            }

            next = state.events.next() => {
                let item = match next {
                    Some(Ok(event)) => {
                        if let Some(transcript) = state.transcript {
                            transcript.log_event(&event);
                        }
                        if event.is_terminal() {
                            state.finish();
                        }
                        Ok(SessionEvent::Agent(event))
                    }
                    Some(Err(err)) => {
                        state.finish();
                        Err(SessionError::Stream(err))
                    }
                    None => {
                        state.finish();
                        Err(SessionError::Stream(RuntimeError::Closed))
                    }
                };
                return Some((item, state));
            }
        }
    }
}
