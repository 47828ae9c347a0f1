//! Donna Life OS.
//!
//! A personal-assistant server: chat clients talk to a Claude agent over a
//! WebSocket, tool use is gated by an interactive permission broker, and
//! document changes in the user's data directory are pushed to subscribers.

pub mod agent;
pub mod api;
pub mod auth;
pub mod permission;
pub mod session;
pub mod terminal;
pub mod ws;
