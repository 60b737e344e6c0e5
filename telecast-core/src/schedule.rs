//! Schedule projection.
//!
//! Derives a forward-looking schedule from the currently-playing movie
//! and the queued entries. Durations come from ffprobe with a fallback
//! when probing fails; times render as HH:MM in West Africa Time.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, warn};

use crate::config::StreamingConfig;
use crate::models::{ChannelRecord, Movie, ScheduleRow};
use crate::{Error, Result};

/// WAT is a fixed UTC+1, no DST.
const WAT_OFFSET_SECS: i32 = 3600;

/// Upcoming rows shown beyond the current entry.
const UPCOMING_ROWS: usize = 10;

fn render_hhmm(t: DateTime<Utc>) -> String {
    match FixedOffset::east_opt(WAT_OFFSET_SECS) {
        Some(tz) => t.with_timezone(&tz).format("%H:%M").to_string(),
        None => t.format("%H:%M").to_string(),
    }
}

/// Probe a media file's duration via ffprobe.
pub async fn probe_duration(
    ffprobe: &Path,
    file: &Path,
    timeout: Duration,
) -> Result<Duration> {
    let run = tokio::process::Command::new(ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(file)
        .output();

    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| Error::ProbeFailed(format!("timed out probing {}", file.display())))?
        .map_err(|e| Error::ProbeFailed(format!("ffprobe failed to run: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::ProbeFailed(format!(
            "ffprobe exited {:?}: {}",
            output.status.code(),
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| Error::ProbeFailed(format!("unparseable duration for {}", file.display())))
}

/// Projects schedules for one process; carries the probe settings.
#[derive(Clone)]
pub struct ScheduleProjector {
    ffprobe_path: std::path::PathBuf,
    probe_timeout: Duration,
    fallback: Duration,
}

impl ScheduleProjector {
    #[must_use]
    pub fn new(streaming: &StreamingConfig) -> Self {
        Self {
            ffprobe_path: streaming.ffprobe_path.clone(),
            probe_timeout: streaming.probe_timeout(),
            fallback: streaming.fallback_duration(),
        }
    }

    /// Probe one movie, falling back to the configured default duration.
    pub async fn duration_of(&self, movie: &Movie) -> Duration {
        match probe_duration(&self.ffprobe_path, &movie.file_path, self.probe_timeout).await {
            Ok(d) => d,
            Err(e) => {
                warn!(title = %movie.title, error = %e, "duration probe failed, using fallback");
                self.fallback
            }
        }
    }

    /// Project the schedule for a channel record at `now`.
    pub async fn project(&self, record: &ChannelRecord, now: DateTime<Utc>) -> Vec<ScheduleRow> {
        let mut durations = Vec::with_capacity(record.queue.len().min(UPCOMING_ROWS));
        for movie in record.queue.iter().take(UPCOMING_ROWS) {
            durations.push((movie.title.clone(), self.duration_of(movie).await));
        }
        let current = match (&record.current_movie, record.current_start_time, record.current_end_time)
        {
            (Some(title), Some(start), Some(end)) => Some((title.clone(), start, end)),
            _ => None,
        };
        let rows = project_rows(current, &durations, now);
        debug!(rows = rows.len(), "schedule projected");
        rows
    }
}

/// Pure projection: the current entry first, then up to ten upcoming
/// entries, each starting one second after its predecessor ends.
fn project_rows(
    current: Option<(String, DateTime<Utc>, DateTime<Utc>)>,
    upcoming: &[(String, Duration)],
    now: DateTime<Utc>,
) -> Vec<ScheduleRow> {
    let mut rows = Vec::with_capacity(upcoming.len() + 1);

    let mut cursor = match current {
        Some((title, start, end)) => {
            rows.push(ScheduleRow {
                title,
                start_time: render_hhmm(start),
                end_time: render_hhmm(end),
                current: true,
            });
            end
        }
        None => now,
    };

    for (title, duration) in upcoming.iter().take(UPCOMING_ROWS) {
        let start = cursor + chrono::Duration::seconds(1);
        let end = start
            + chrono::Duration::from_std(*duration)
                .unwrap_or_else(|_| chrono::Duration::minutes(90));
        rows.push(ScheduleRow {
            title: title.clone(),
            start_time: render_hhmm(start),
            end_time: render_hhmm(end),
            current: false,
        });
        cursor = end;
    }

    rows
}
