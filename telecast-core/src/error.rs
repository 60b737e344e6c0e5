use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Input file missing or unreadable: {}", .0.display())]
    InputMissing(PathBuf),

    #[error("Failed to spawn transcoder: {0}")]
    SpawnFailed(String),

    #[error("Slot not ready to publish: {0}")]
    PublishNotReady(String),

    #[error("Duration probe failed: {0}")]
    ProbeFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error maps to the reserved -1 transcoder exit code
    /// (failed to even start).
    #[must_use]
    pub const fn is_spawn_failure(&self) -> bool {
        matches!(self, Self::InputMissing(_) | Self::SpawnFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
