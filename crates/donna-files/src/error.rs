use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Watch root does not exist: {0}")]
    RootMissing(PathBuf),

    #[error("Failed to start file watcher: {0}")]
    Notify(#[from] notify::Error),
}
