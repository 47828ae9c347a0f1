//! File-change broadcasting for the Donna data directory.
//!
//! A single notify watcher runs while at least one client is subscribed. Its
//! callback thread filters and translates filesystem events, hands them to an
//! async fan-out task, and the fan-out task pushes them to every subscriber.
//! The broadcaster is constructed once and injected through router state.

pub mod broadcaster;
pub mod config;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod routes;

pub use broadcaster::{FileWatchBroadcaster, SubscriberId, Subscription};
pub use config::WatchConfig;
pub use error::WatchError;
pub use filter::{PathFilter, translate_event};
