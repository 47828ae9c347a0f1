//! Protocol types for Donna agent communication.
//!
//! ```text
//! Browser <--[WS /ws/chat: ClientMessage / ServerMessage]--> Bridge <--[AgentEvent]--> Runtime
//! Browser <--[WS /ws/files: FileWatchMessage]-------------- Broadcaster <-- notify thread
//! ```
//!
//! `AgentEvent` is the vocabulary shared between the session orchestrator and the
//! runtime collaborator. `ServerMessage` is what the client sees; the bridge shapes
//! one into the other depending on the connection's verbose flag.

pub mod events;
pub mod messages;
pub mod watch;

pub use events::{AgentEvent, SessionStats, ToolResultContent};
pub use messages::{ClientMessage, DecodeError, ServerMessage};
pub use watch::{FileChangeEvent, FileChangeKind, FileWatchMessage};
