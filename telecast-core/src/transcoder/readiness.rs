//! Filesystem readiness detection.
//!
//! A slot is playable when both of its playlists exist with content and
//! the stream playlist references at least two segments that are really
//! on disk with real payload. The transcoder emits asynchronously, so
//! this is polled; the directory is the source of truth.

use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::models::Slot;
use crate::publisher::referenced_segments;

/// Result of a readiness watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessOutcome {
    Ready,
    TimedOut,
    Cancelled,
}

/// One observation: playlists present, at least two listed segments,
/// every listed segment on disk and above the size floor.
pub async fn check_playable(dir: &Path, slot: Slot, min_segment_bytes: u64) -> bool {
    for playlist in [slot.master_playlist(dir), slot.stream_playlist(dir)] {
        match tokio::fs::metadata(&playlist).await {
            Ok(meta) if meta.len() > 0 => {}
            _ => return false,
        }
    }

    let Ok(bytes) = tokio::fs::read(slot.stream_playlist(dir)).await else {
        return false;
    };
    let text = String::from_utf8_lossy(&bytes);
    let segments = referenced_segments(&text, slot);
    if segments.len() < 2 {
        return false;
    }

    for name in &segments {
        match tokio::fs::metadata(dir.join(name)).await {
            Ok(meta) if meta.len() > min_segment_bytes => {}
            _ => return false,
        }
    }

    true
}

/// Poll the slot until it is playable, the deadline passes, or the
/// token fires. On deadline one final check runs before giving up.
pub async fn watch_playable(
    dir: &Path,
    slot: Slot,
    poll: Duration,
    deadline: Duration,
    min_segment_bytes: u64,
    cancel: &CancellationToken,
) -> ReadinessOutcome {
    let expires = Instant::now() + deadline;

    loop {
        if check_playable(dir, slot, min_segment_bytes).await {
            debug!(%slot, "slot playable");
            return ReadinessOutcome::Ready;
        }

        let now = Instant::now();
        if now >= expires {
            // Last look: the window may have filled while we slept.
            if check_playable(dir, slot, min_segment_bytes).await {
                return ReadinessOutcome::Ready;
            }
            debug!(%slot, "readiness deadline elapsed");
            return ReadinessOutcome::TimedOut;
        }

        let nap = poll.min(expires - now);
        trace!(%slot, "slot not yet playable");
        tokio::select! {
            () = cancel.cancelled() => return ReadinessOutcome::Cancelled,
            () = tokio::time::sleep(nap) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const MIN: u64 = 5000;

    fn dir() -> (tempfile::TempDir, PathBuf) {
        let d = tempfile::tempdir().unwrap();
        let p = d.path().to_path_buf();
        (d, p)
    }

    async fn write_playable(dir: &Path, slot: Slot) {
        tokio::fs::write(
            slot.stream_playlist(dir),
            "#EXTM3U\n#EXTINF:2.0,\nsegment_A_000.ts\n#EXTINF:2.0,\nsegment_A_001.ts\n",
        )
        .await
        .unwrap();
        tokio::fs::write(slot.master_playlist(dir), "#EXTM3U\nstream_A.m3u8\n")
            .await
            .unwrap();
        for name in ["segment_A_000.ts", "segment_A_001.ts"] {
            tokio::fs::write(dir.join(name), vec![0u8; 6000]).await.unwrap();
        }
    }

    #[tokio::test]
    async fn empty_dir_is_not_playable() {
        let (_g, dir) = dir();
        assert!(!check_playable(&dir, Slot::A, MIN).await);
    }

    #[tokio::test]
    async fn empty_playlist_is_not_playable() {
        let (_g, dir) = dir();
        write_playable(&dir, Slot::A).await;
        tokio::fs::write(Slot::A.master_playlist(&dir), b"").await.unwrap();
        assert!(!check_playable(&dir, Slot::A, MIN).await);
    }

    #[tokio::test]
    async fn one_listed_segment_is_not_playable() {
        let (_g, dir) = dir();
        write_playable(&dir, Slot::A).await;
        tokio::fs::write(
            Slot::A.stream_playlist(&dir),
            "#EXTM3U\n#EXTINF:2.0,\nsegment_A_000.ts\n",
        )
        .await
        .unwrap();
        assert!(!check_playable(&dir, Slot::A, MIN).await);
    }

    #[tokio::test]
    async fn thin_segment_is_not_playable() {
        let (_g, dir) = dir();
        write_playable(&dir, Slot::A).await;
        tokio::fs::write(dir.join("segment_A_001.ts"), vec![0u8; 64]).await.unwrap();
        assert!(!check_playable(&dir, Slot::A, MIN).await);
    }

    #[tokio::test]
    async fn complete_output_is_playable() {
        let (_g, dir) = dir();
        write_playable(&dir, Slot::A).await;
        assert!(check_playable(&dir, Slot::A, MIN).await);
    }

    #[tokio::test]
    async fn watch_sees_output_appear() {
        let (_g, dir) = dir();
        let cancel = CancellationToken::new();

        let writer_dir = dir.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            write_playable(&writer_dir, Slot::A).await;
        });

        let outcome = watch_playable(
            &dir,
            Slot::A,
            Duration::from_millis(5),
            Duration::from_secs(2),
            MIN,
            &cancel,
        )
        .await;
        assert_eq!(outcome, ReadinessOutcome::Ready);
    }

    #[tokio::test]
    async fn watch_times_out_on_silence() {
        let (_g, dir) = dir();
        let cancel = CancellationToken::new();
        let outcome = watch_playable(
            &dir,
            Slot::B,
            Duration::from_millis(5),
            Duration::from_millis(40),
            MIN,
            &cancel,
        )
        .await;
        assert_eq!(outcome, ReadinessOutcome::TimedOut);
    }

    #[tokio::test]
    async fn watch_stops_when_cancelled() {
        let (_g, dir) = dir();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = watch_playable(
            &dir,
            Slot::B,
            Duration::from_secs(5),
            Duration::from_secs(30),
            MIN,
            &cancel,
        )
        .await;
        assert_eq!(outcome, ReadinessOutcome::Cancelled);
    }
}
