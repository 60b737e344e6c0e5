use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A queued movie entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub title: String,
    /// Absolute path to a readable input media file.
    pub file_path: PathBuf,
    pub added_by: String,
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Enqueue request as the outer adapters hand it over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueMovieRequest {
    pub title: String,
    pub file_path: PathBuf,
    pub added_by: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub format: Option<String>,
}

impl EnqueueMovieRequest {
    /// Stamp the request into a queue entry.
    #[must_use]
    pub fn into_movie(self, added_at: DateTime<Utc>) -> Movie {
        Movie {
            title: self.title,
            file_path: self.file_path,
            added_by: self.added_by,
            added_at,
            file_size: self.file_size,
            format: self.format,
        }
    }
}
