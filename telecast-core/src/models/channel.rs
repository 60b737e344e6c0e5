use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Movie;

/// The persisted per-channel record: the value side of `channels.json`.
///
/// The whole catalog file is rewritten after every mutation, so this
/// structure is also the crash-recovery snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelRecord {
    pub name: String,
    pub queue: Vec<Movie>,
    pub schedule: Vec<ScheduleRow>,
    pub current_movie: Option<String>,
    pub current_start_time: Option<DateTime<Utc>>,
    pub current_end_time: Option<DateTime<Utc>>,
}

impl ChannelRecord {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One row of the projected forward schedule, times pre-rendered as
/// HH:MM in West Africa Time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRow {
    pub title: String,
    pub start_time: String,
    pub end_time: String,
    pub current: bool,
}

/// Live status snapshot for external callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub name: String,
    pub current_movie: Option<String>,
    pub is_playing: bool,
    pub playing_ad: bool,
    pub queue_length: usize,
    pub preload_ready: bool,
}

/// Queue listing row for external callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub position: usize,
    pub title: String,
    pub added_by: String,
}
