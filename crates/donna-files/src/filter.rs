//! Path filtering and notify event translation.
//!
//! Runs on the watcher's callback thread, so nothing here may block or panic.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use donna_protocol::{FileChangeEvent, FileChangeKind};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind};

/// Decides which paths under the root are reported, and how they are named.
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    extensions: HashSet<String>,
}

impl PathFilter {
    pub fn new(root: impl Into<PathBuf>, extensions: &[String]) -> Self {
        Self {
            root: root.into(),
            extensions: extensions
                .iter()
                .filter_map(|ext| normalize_extension(ext))
                .collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative `/`-separated path for a reportable document, `None` otherwise.
    ///
    /// Paths outside the root, paths with any hidden component and files whose
    /// extension is not in the configured set are not reportable.
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;

        let mut parts = Vec::new();
        for component in relative.components() {
            if let Component::Normal(part) = component {
                let part = part.to_string_lossy();
                if part.starts_with('.') {
                    return None;
                }
                parts.push(part.into_owned());
            }
        }

        if parts.is_empty() {
            return None;
        }

        let ext = path
            .extension()
            .and_then(|value| value.to_str())
            .and_then(normalize_extension)?;
        if !self.extensions.contains(&ext) {
            return None;
        }

        Some(parts.join("/"))
    }
}

fn normalize_extension(ext: &str) -> Option<String> {
    let trimmed = ext.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_ascii_lowercase())
}

/// Translate one notify event into zero or more document changes.
///
/// Renames become a deletion of the old path followed by a creation of the new
/// one. `RenameMode::Both` is skipped: backends that report it have already
/// delivered the matching `From` and `To` events.
pub fn translate_event(filter: &PathFilter, event: &Event) -> Vec<FileChangeEvent> {
    let mut changes = Vec::new();

    match &event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {}
        EventKind::Create(_) => push_file(filter, &mut changes, FileChangeKind::Created, &event.paths),
        EventKind::Remove(_) => push(filter, &mut changes, FileChangeKind::Deleted, &event.paths),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => push(filter, &mut changes, FileChangeKind::Deleted, &event.paths),
            RenameMode::To => push_file(filter, &mut changes, FileChangeKind::Created, &event.paths),
            RenameMode::Both => {}
            RenameMode::Any | RenameMode::Other => {
                for path in &event.paths {
                    let kind = if path.exists() {
                        FileChangeKind::Created
                    } else {
                        FileChangeKind::Deleted
                    };
                    push_file(filter, &mut changes, kind, std::slice::from_ref(path));
                }
            }
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => {}
        EventKind::Modify(_) => push_file(filter, &mut changes, FileChangeKind::Changed, &event.paths),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
    }

    changes
}

fn push(filter: &PathFilter, out: &mut Vec<FileChangeEvent>, kind: FileChangeKind, paths: &[PathBuf]) {
    for path in paths {
        if let Some(relative) = filter.relative_path(path) {
            out.push(FileChangeEvent::new(kind, relative));
        }
    }
}

/// Like `push`, but skips paths that currently exist as directories.
fn push_file(
    filter: &PathFilter,
    out: &mut Vec<FileChangeEvent>,
    kind: FileChangeKind,
    paths: &[PathBuf],
) {
    for path in paths {
        if path.is_dir() {
            continue;
        }
        if let Some(relative) = filter.relative_path(path) {
            out.push(FileChangeEvent::new(kind, relative));
        }
    }
}
