//! Session errors.

use thiserror::Error;

use crate::agent::RuntimeError;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The runtime could not be opened. Not retried.
    #[error("{0}")]
    Initialization(#[source] RuntimeError),

    #[error("session has not been entered")]
    NotEntered,

    #[error("session misuse: {0}")]
    ProtocolMisuse(&'static str),

    /// Submitting a user message failed.
    #[error("{0}")]
    Runtime(#[source] RuntimeError),

    /// The runtime's event stream broke mid-turn.
    #[error("{0}")]
    Stream(#[source] RuntimeError),
}

impl SessionError {
    /// Text reported to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Initialization(err) => format!("Failed to start agent: {err}"),
            SessionError::Runtime(err) | SessionError::Stream(err) => format!("Agent error: {err}"),
            other => other.to_string(),
        }
    }
}
