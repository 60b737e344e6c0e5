//! Persisted channel catalog (`channels.json`).
//!
//! The catalog is the only mutable state shared across channels. It is
//! held in memory behind one lock and rewritten to disk, whole, after
//! every mutation via write-temp-then-rename, so the file on disk is
//! always a complete snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::models::{ChannelId, ChannelRecord, Movie, ScheduleRow};
use crate::{Error, Result};

pub struct Catalog {
    path: PathBuf,
    channels: RwLock<HashMap<ChannelId, ChannelRecord>>,
}

impl Catalog {
    /// Load the catalog from disk, starting empty if the file does not
    /// exist yet.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let channels = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let map: HashMap<ChannelId, ChannelRecord> = serde_json::from_slice(&bytes)?;
                info!(channels = map.len(), path = %path.display(), "catalog loaded");
                map
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no catalog on disk, starting empty");
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            channels: RwLock::new(channels),
        })
    }

    async fn persist(&self, channels: &HashMap<ChannelId, ChannelRecord>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(channels)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Create the channel record if absent. Returns `true` when a new
    /// record was created.
    pub async fn ensure_channel(&self, id: &ChannelId, name: &str) -> Result<bool> {
        let mut channels = self.channels.write().await;
        if channels.contains_key(id) {
            return Ok(false);
        }
        channels.insert(id.clone(), ChannelRecord::new(name));
        self.persist(&channels).await?;
        Ok(true)
    }

    pub async fn contains(&self, id: &ChannelId) -> bool {
        self.channels.read().await.contains_key(id)
    }

    pub async fn get(&self, id: &ChannelId) -> Option<ChannelRecord> {
        self.channels.read().await.get(id).cloned()
    }

    pub async fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.read().await.keys().cloned().collect()
    }

    pub async fn list(&self) -> Vec<(ChannelId, ChannelRecord)> {
        self.channels
            .read()
            .await
            .iter()
            .map(|(id, rec)| (id.clone(), rec.clone()))
            .collect()
    }

    /// Append a movie to the queue. Returns the queue length *before*
    /// the append, so callers can tell a first enqueue apart.
    pub async fn append_movie(&self, id: &ChannelId, movie: Movie) -> Result<usize> {
        let mut channels = self.channels.write().await;
        let record = channels
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        let previous_len = record.queue.len();
        record.queue.push(movie);
        self.persist(&channels).await?;
        Ok(previous_len)
    }

    pub async fn peek_head(&self, id: &ChannelId) -> Option<Movie> {
        self.channels
            .read()
            .await
            .get(id)
            .and_then(|r| r.queue.first().cloned())
    }

    pub async fn queue_len(&self, id: &ChannelId) -> usize {
        self.channels
            .read()
            .await
            .get(id)
            .map_or(0, |r| r.queue.len())
    }

    /// Remove and return the head of the queue.
    ///
    /// Callers shift only after a transition has otherwise completed;
    /// a crash before the shift replays the head on restart.
    pub async fn shift_queue(&self, id: &ChannelId) -> Result<Option<Movie>> {
        let mut channels = self.channels.write().await;
        let record = channels
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        if record.queue.is_empty() {
            return Ok(None);
        }
        let head = record.queue.remove(0);
        self.persist(&channels).await?;
        Ok(Some(head))
    }

    pub async fn set_current(
        &self,
        id: &ChannelId,
        title: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()> {
        let mut channels = self.channels.write().await;
        let record = channels
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        record.current_movie = Some(title.to_string());
        record.current_start_time = Some(start);
        record.current_end_time = Some(end);
        self.persist(&channels).await
    }

    pub async fn clear_current(&self, id: &ChannelId) -> Result<()> {
        let mut channels = self.channels.write().await;
        let record = channels
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        record.current_movie = None;
        record.current_start_time = None;
        record.current_end_time = None;
        self.persist(&channels).await
    }

    pub async fn set_schedule(&self, id: &ChannelId, rows: Vec<ScheduleRow>) -> Result<()> {
        let mut channels = self.channels.write().await;
        let record = channels
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        record.schedule = rows;
        self.persist(&channels).await
    }
}

/// Wipe and recreate a channel's output directory.
///
/// Called once per channel on process start; the transcoder output is
/// rolling and disposable, so nothing in it survives a restart.
pub async fn reset_output_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "failed to clear output dir"),
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}
