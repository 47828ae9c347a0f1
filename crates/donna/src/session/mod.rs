//! Conversation sessions.
//!
//! A [`SessionOrchestrator`] owns one runtime connection, the permission broker
//! and the transcript for a single chat. Front-ends (the WebSocket bridge and
//! the terminal) drive it through `enter`, `send`, `stream_response` and `exit`.

mod error;
mod orchestrator;
pub mod profile;
pub mod prompt;
mod service;
pub mod temporal;
pub mod transcript;

pub use error::SessionError;
pub use orchestrator::{SessionEvent, SessionOrchestrator, TurnStream};
pub use profile::{ProfileStore, UserPreferences};
pub use service::{SessionConfig, SessionService};
pub use transcript::Transcript;
