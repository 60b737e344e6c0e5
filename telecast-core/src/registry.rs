//! In-process channel registry.
//!
//! Maps channel ids to their running engines. All mutation of a
//! channel's playback goes through its mailbox; the registry only
//! routes.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::catalog::{reset_output_dir, Catalog};
use crate::config::StreamingConfig;
use crate::engine::{ChannelEngine, ChannelHandle};
use crate::models::{
    ChannelId, ChannelStatus, EnqueueMovieRequest, QueueEntry, ScheduleRow,
};
use crate::{Error, Result};

pub struct ChannelRegistry {
    streaming: StreamingConfig,
    catalog: Arc<Catalog>,
    channels: DashMap<ChannelId, ChannelHandle>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new(streaming: StreamingConfig, catalog: Arc<Catalog>) -> Self {
        Self {
            streaming,
            catalog,
            channels: DashMap::new(),
        }
    }

    fn output_dir(&self, id: &ChannelId) -> PathBuf {
        self.streaming.output_root.join(id.as_str())
    }

    /// Create (or resume) a channel and start its engine. Idempotent;
    /// apart from input validation it fails only when the output
    /// directory cannot be prepared.
    pub async fn init_channel(&self, id: &ChannelId, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("channel name must not be empty".to_string()));
        }
        if self.channels.contains_key(id) {
            return Ok(());
        }

        self.catalog.ensure_channel(id, name).await?;

        let dir = self.output_dir(id);
        reset_output_dir(&dir).await?;

        let record = self
            .catalog
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        let handle = ChannelEngine::start(
            id.clone(),
            record.name,
            dir,
            self.streaming.clone(),
            Arc::clone(&self.catalog),
        )
        .await;

        // A racing init may have beaten us; the map keeps the first.
        match self.channels.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(handle);
                info!(channel = %id, "channel initialized");
            }
            dashmap::mapref::entry::Entry::Occupied(_) => {
                handle.shutdown();
            }
        }
        Ok(())
    }

    /// Start engines for every channel already in the catalog. Called
    /// once at process start; the persisted queue head replays.
    pub async fn restore_persisted(&self) -> usize {
        let mut restored = 0;
        for (id, record) in self.catalog.list().await {
            match self.init_channel(&id, &record.name).await {
                Ok(()) => restored += 1,
                Err(e) => warn!(channel = %id, error = %e, "failed to restore channel"),
            }
        }
        restored
    }

    pub async fn enqueue(&self, id: &ChannelId, request: EnqueueMovieRequest) -> Result<()> {
        if request.title.trim().is_empty() {
            return Err(Error::InvalidInput("movie title must not be empty".to_string()));
        }
        if !request.file_path.is_absolute() {
            return Err(Error::InvalidInput(format!(
                "movie path must be absolute, got {}",
                request.file_path.display()
            )));
        }
        let handle = self
            .channels
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        handle.enqueue(request.into_movie(Utc::now()))
    }

    pub async fn status(&self, id: &ChannelId) -> Result<ChannelStatus> {
        if let Some(handle) = self.channels.get(id) {
            return Ok(handle.status());
        }
        // Known but not running: report the persisted view.
        let record = self
            .catalog
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        Ok(ChannelStatus {
            name: record.name,
            current_movie: record.current_movie,
            queue_length: record.queue.len(),
            ..ChannelStatus::default()
        })
    }

    pub async fn queue(&self, id: &ChannelId) -> Result<Vec<QueueEntry>> {
        let record = self
            .catalog
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        Ok(record
            .queue
            .iter()
            .enumerate()
            .map(|(i, movie)| QueueEntry {
                position: i + 1,
                title: movie.title.clone(),
                added_by: movie.added_by.clone(),
            })
            .collect())
    }

    pub async fn schedule(&self, id: &ChannelId) -> Result<Vec<ScheduleRow>> {
        let record = self
            .catalog
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        Ok(record.schedule)
    }

    /// Ids and live statuses of every known channel.
    pub async fn list(&self) -> Vec<(ChannelId, ChannelStatus)> {
        let mut out = Vec::new();
        for (id, _) in self.catalog.list().await {
            if let Ok(status) = self.status(&id).await {
                out.push((id, status));
            }
        }
        out
    }

    /// Stop every engine. Transcoders die with their handles.
    pub fn shutdown_all(&self) {
        for entry in self.channels.iter() {
            entry.value().shutdown();
        }
    }
}
