//! File-watch wire protocol.

use serde::{Deserialize, Serialize};

/// Kind of change detected on a watched document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Created,
    Changed,
    Deleted,
}

/// A filtered change, with a `/`-separated path relative to the watched root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    pub kind: FileChangeKind,
    pub path: String,
}

impl FileChangeEvent {
    pub fn new(kind: FileChangeKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Messages pushed to file-watch subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileWatchMessage {
    /// Sent once to a new subscriber.
    Connected { watching: String },
    FileCreated { path: String },
    FileChanged { path: String },
    FileDeleted { path: String },
}

impl From<FileChangeEvent> for FileWatchMessage {
    fn from(event: FileChangeEvent) -> Self {
        match event.kind {
            FileChangeKind::Created => FileWatchMessage::FileCreated { path: event.path },
            FileChangeKind::Changed => FileWatchMessage::FileChanged { path: event.path },
            FileChangeKind::Deleted => FileWatchMessage::FileDeleted { path: event.path },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_event_to_wire() {
        let msg: FileWatchMessage =
            FileChangeEvent::new(FileChangeKind::Deleted, "notes/a.md").into();
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "file_deleted", "path": "notes/a.md"})
        );
    }

    #[test]
    fn test_connected_wire() {
        let msg = FileWatchMessage::Connected {
            watching: "/home/me/donna-data".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "connected", "watching": "/home/me/donna-data"})
        );
    }
}
