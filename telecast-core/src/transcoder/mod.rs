//! Transcoder supervision.
//!
//! Each spawn wraps one ffmpeg child writing a slot's HLS output. The
//! supervisor verifies the input, drains stderr so the child never
//! stalls on a full pipe, runs the readiness detector for the slot, and
//! reports lifecycle events into the owning channel's mailbox. Kills
//! are hard; the rolling output is disposable.

mod args;
pub mod readiness;

pub use args::build_args;

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamingConfig;
use crate::engine::EngineEvent;
use crate::models::Slot;
use crate::{Error, Result};

use readiness::{watch_playable, ReadinessOutcome};

/// Exit code reported when the child failed to start or died without a
/// status (signal kill).
pub const EXIT_NOT_STARTED: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderRole {
    Ad,
    Movie,
}

impl std::fmt::Display for TranscoderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ad => f.write_str("ad"),
            Self::Movie => f.write_str("movie"),
        }
    }
}

/// Everything one spawn needs.
#[derive(Debug, Clone)]
pub struct TranscoderSpec {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub slot: Slot,
    pub role: TranscoderRole,
    pub title: String,
    /// Stamps the spawn; events carrying an older generation are stale.
    pub generation: u64,
}

/// A live transcoder child. Dropping the handle kills the child.
#[derive(Debug)]
pub struct TranscoderHandle {
    pub slot: Slot,
    pub role: TranscoderRole,
    pub generation: u64,
    pub pid: Option<u32>,
    cancel: CancellationToken,
}

impl TranscoderHandle {
    /// Hard-kill the child and stop its detector. Idempotent.
    pub fn kill(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub const fn is_ad(&self) -> bool {
        matches!(self.role, TranscoderRole::Ad)
    }
}

impl Drop for TranscoderHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawn a transcoder for one slot.
///
/// Fails fast with [`Error::InputMissing`] / [`Error::SpawnFailed`]
/// before any child exists; the caller treats both as exit code -1.
/// Afterwards, lifecycle is reported through `events`:
/// `Ready`/`ReadinessTimeout` from the detector (at most one of them),
/// and `Exited` on natural child exit. An intentional kill reports
/// nothing; the caller has already moved on.
pub async fn spawn(
    streaming: &StreamingConfig,
    spec: TranscoderSpec,
    events: mpsc::UnboundedSender<EngineEvent>,
) -> Result<TranscoderHandle> {
    match tokio::fs::metadata(&spec.input).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Err(Error::InputMissing(spec.input.clone())),
    }

    let argv = build_args(
        streaming,
        &spec.input,
        &spec.output_dir,
        spec.slot,
        spec.role,
        &spec.title,
    );

    let mut child = tokio::process::Command::new(&streaming.ffmpeg_path)
        .args(&argv)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::SpawnFailed(format!("{}: {e}", streaming.ffmpeg_path.display())))?;

    let pid = child.id();
    info!(
        slot = %spec.slot,
        role = %spec.role,
        title = %spec.title,
        pid,
        input = %spec.input.display(),
        "transcoder spawned"
    );

    let cancel = CancellationToken::new();

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(drain_stderr(stderr, spec.slot, spec.role));
    }

    // Readiness detector for this slot's output.
    {
        let events = events.clone();
        let cancel = cancel.clone();
        let dir = spec.output_dir.clone();
        let slot = spec.slot;
        let generation = spec.generation;
        let poll = streaming.readiness_poll();
        let deadline = streaming.readiness_deadline();
        let min_bytes = streaming.min_segment_bytes;
        tokio::spawn(async move {
            let outcome =
                watch_playable(&dir, slot, poll, deadline, min_bytes, &cancel).await;
            let event = match outcome {
                ReadinessOutcome::Ready => EngineEvent::Ready { slot, generation },
                ReadinessOutcome::TimedOut => {
                    EngineEvent::ReadinessTimeout { slot, generation }
                }
                ReadinessOutcome::Cancelled => return,
            };
            let _ = events.send(event);
        });
    }

    // Monitor: natural exit reports an event; a kill does not.
    {
        let cancel = cancel.clone();
        let slot = spec.slot;
        let role = spec.role;
        let generation = spec.generation;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    debug!(%slot, %role, "transcoder killed");
                }
                status = child.wait() => {
                    // Child is gone; stop the detector before reporting.
                    cancel.cancel();
                    let code = match status {
                        Ok(status) => status.code().unwrap_or(EXIT_NOT_STARTED),
                        Err(e) => {
                            warn!(%slot, error = %e, "failed to reap transcoder");
                            EXIT_NOT_STARTED
                        }
                    };
                    info!(%slot, %role, code, "transcoder exited");
                    let _ = events.send(EngineEvent::Exited { slot, generation, code });
                }
            }
        });
    }

    Ok(TranscoderHandle {
        slot: spec.slot,
        role: spec.role,
        generation: spec.generation,
        pid,
        cancel,
    })
}

/// Keep the child's stderr drained, surfacing error markers and a
/// sample of the periodic progress lines.
async fn drain_stderr(
    stderr: tokio::process::ChildStderr,
    slot: Slot,
    role: TranscoderRole,
) {
    let mut lines = BufReader::new(stderr).lines();
    let mut progress_seen: u64 = 0;
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with("frame=") {
            progress_seen += 1;
            if progress_seen % 30 == 1 {
                debug!(%slot, %role, "{trimmed}");
            }
        } else if trimmed.to_ascii_lowercase().contains("error") {
            warn!(%slot, %role, "transcoder: {trimmed}");
        } else {
            debug!(%slot, %role, "transcoder: {trimmed}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_input_fails_before_spawning() {
        let streaming = StreamingConfig::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let spec = TranscoderSpec {
            input: "/nonexistent/input.mp4".into(),
            output_dir: std::env::temp_dir(),
            slot: Slot::A,
            role: TranscoderRole::Movie,
            title: "gone".to_string(),
            generation: 1,
        };

        let err = spawn(&streaming, spec, tx).await.unwrap_err();
        assert!(matches!(err, Error::InputMissing(_)));
        assert!(err.is_spawn_failure());
        // Nothing was spawned, so nothing reports.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn directory_input_is_rejected() {
        let streaming = StreamingConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let spec = TranscoderSpec {
            input: dir.path().to_path_buf(),
            output_dir: dir.path().to_path_buf(),
            slot: Slot::B,
            role: TranscoderRole::Ad,
            title: "ad".to_string(),
            generation: 1,
        };
        let err = spawn(&streaming, spec, tx).await.unwrap_err();
        assert!(matches!(err, Error::InputMissing(_)));
    }
}
