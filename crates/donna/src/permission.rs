//! Permission broker.
//!
//! Tool invocations outside the auto-allow set are held until a front-end
//! answers. The broker keeps a single decision slot per session: the runtime side
//! awaits [`PendingPermission::decision`] while the front-end is notified through
//! [`PermissionPrompts`] and answers with [`PermissionBroker::resolve`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::agent::PermissionHandler;

/// Tools that never need a decision.
pub const DEFAULT_AUTO_ALLOWED_TOOLS: &[&str] =
    &["Read", "Write", "Edit", "Grep", "Glob", "Skill", "Task"];

/// How long a request may stay pending before it is denied.
pub const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Message handed back to the runtime when a tool is denied.
pub const DENY_MESSAGE: &str = "User declined the request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny,
}

impl PermissionDecision {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed { Self::Allow } else { Self::Deny }
    }

    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// A tool invocation waiting for a decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    pub tool_name: String,
    pub tool_input: Value,
}

impl PermissionRequest {
    /// The shell command for `Bash` requests, if any.
    pub fn command(&self) -> Option<&str> {
        self.tool_input.get("command").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    pub auto_allowed: HashSet<String>,
    pub timeout: Duration,
}

impl PermissionPolicy {
    pub fn new<I, S>(auto_allowed: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            auto_allowed: auto_allowed.into_iter().map(Into::into).collect(),
            timeout,
        }
    }
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_AUTO_ALLOWED_TOOLS.iter().copied(),
            DEFAULT_PERMISSION_TIMEOUT,
        )
    }
}

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("a permission request for '{pending}' is already pending")]
    AlreadyPending { pending: String },
}

/// Receiving side of the broker's prompt notifications.
pub type PermissionPrompts = mpsc::UnboundedReceiver<PermissionRequest>;

struct Slot {
    id: u64,
    tool_name: String,
    responder: oneshot::Sender<PermissionDecision>,
}

impl Slot {
    fn is_live(&self) -> bool {
        !self.responder.is_closed()
    }
}

pub struct PermissionBroker {
    policy: PermissionPolicy,
    slot: Mutex<Option<Slot>>,
    next_id: AtomicU64,
    prompts: mpsc::UnboundedSender<PermissionRequest>,
}

impl PermissionBroker {
    pub fn new(policy: PermissionPolicy) -> (Arc<Self>, PermissionPrompts) {
        let (prompts, receiver) = mpsc::unbounded_channel();
        let broker = Arc::new(Self {
            policy,
            slot: Mutex::new(None),
            next_id: AtomicU64::new(1),
            prompts,
        });
        (broker, receiver)
    }

    pub fn timeout(&self) -> Duration {
        self.policy.timeout
    }

    pub fn is_auto_allowed(&self, tool_name: &str) -> bool {
        self.policy.auto_allowed.contains(tool_name)
    }

    /// True while a request is waiting for an answer.
    pub fn has_pending(&self) -> bool {
        self.lock_slot().as_ref().is_some_and(Slot::is_live)
    }

    /// Open the decision slot and notify the prompt receiver.
    pub fn request(
        self: &Arc<Self>,
        tool_name: impl Into<String>,
        tool_input: Value,
    ) -> Result<PendingPermission, PermissionError> {
        let tool_name = tool_name.into();
        let (responder, receiver) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut slot = self.lock_slot();
            if let Some(existing) = slot.as_ref().filter(|s| s.is_live()) {
                return Err(PermissionError::AlreadyPending {
                    pending: existing.tool_name.clone(),
                });
            }
            *slot = Some(Slot {
                id,
                tool_name: tool_name.clone(),
                responder,
            });
        }

        info!(tool = %tool_name, "Permission requested");
        let request = PermissionRequest {
            tool_name: tool_name.clone(),
            tool_input,
        };
        if self.prompts.send(request).is_err() {
            debug!(tool = %tool_name, "No prompt listener for permission request");
        }

        Ok(PendingPermission {
            id,
            tool_name,
            receiver,
            timeout: self.policy.timeout,
            broker: Arc::clone(self),
        })
    }

    /// Complete the pending request. Returns `false` if nothing was pending.
    pub fn resolve(&self, decision: PermissionDecision) -> bool {
        let Some(slot) = self.lock_slot().take() else {
            debug!(?decision, "Ignoring permission decision, nothing pending");
            return false;
        };

        if slot.responder.send(decision).is_err() {
            debug!(tool = %slot.tool_name, "Permission requester went away before the decision");
            return false;
        }
        info!(tool = %slot.tool_name, ?decision, "Permission resolved");
        true
    }

    /// Deny whatever is pending.
    pub fn cancel(&self) {
        if self.resolve(PermissionDecision::Deny) {
            debug!("Cancelled pending permission request");
        }
    }

    /// Full decision path for one tool invocation.
    pub async fn decide(self: &Arc<Self>, tool_name: &str, tool_input: Value) -> PermissionDecision {
        if self.is_auto_allowed(tool_name) {
            debug!(tool = %tool_name, "Tool is auto-allowed");
            return PermissionDecision::Allow;
        }

        match self.request(tool_name, tool_input) {
            Ok(pending) => pending.decision().await,
            Err(err) => {
                warn!("Denying {tool_name}: {err}");
                PermissionDecision::Deny
            }
        }
    }

    /// Clear the slot if it still belongs to `id`. Returns whether it did.
    fn expire(&self, id: u64) -> bool {
        let mut slot = self.lock_slot();
        if slot.as_ref().is_some_and(|s| s.id == id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<Slot>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The runtime side of an open request.
pub struct PendingPermission {
    id: u64,
    tool_name: String,
    receiver: oneshot::Receiver<PermissionDecision>,
    timeout: Duration,
    broker: Arc<PermissionBroker>,
}

impl PendingPermission {
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Wait for the decision. Timeouts and abandoned requests deny.
    pub async fn decision(mut self) -> PermissionDecision {
        match tokio::time::timeout(self.timeout, &mut self.receiver).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => {
                debug!(tool = %self.tool_name, "Permission slot dropped, denying");
                PermissionDecision::Deny
            }
            Err(_) => {
                if self.broker.expire(self.id) {
                    warn!(
                        tool = %self.tool_name,
                        "Permission request timed out after {:?}, denying", self.timeout
                    );
                    return PermissionDecision::Deny;
                }
                // A resolve won the race against the timer.
                self.receiver.try_recv().unwrap_or(PermissionDecision::Deny)
            }
        }
    }
}

/// [`PermissionHandler`] that routes runtime callbacks through a broker.
#[derive(Clone)]
pub struct BrokeredPermissions {
    broker: Arc<PermissionBroker>,
}

impl BrokeredPermissions {
    pub fn new(broker: Arc<PermissionBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl PermissionHandler for BrokeredPermissions {
    async fn can_use_tool(&self, tool_name: &str, input: &Value) -> PermissionDecision {
        self.broker.decide(tool_name, input.clone()).await
    }
}
