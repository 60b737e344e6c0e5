//! Active-slot publisher.
//!
//! Republishes the channel's public playlist pair by byte-copying a
//! slot's playlists onto the stable names. Copies, never symlinks;
//! static file servers and some player chains mishandle symlinks.
//! Publication is the only mutation ever performed on the public names.

use std::path::Path;

use regex::Regex;
use tracing::{debug, warn};

use crate::models::{Slot, PUBLIC_MASTER, PUBLIC_STREAM};
use crate::{Error, Result};

/// Segment filenames referenced by a slot's stream playlist, in order,
/// deduplicated.
pub fn referenced_segments(playlist: &str, slot: Slot) -> Vec<String> {
    let Ok(re) = Regex::new(&slot.segment_pattern()) else {
        return Vec::new();
    };
    let mut seen = Vec::new();
    for m in re.find_iter(playlist) {
        let name = m.as_str().to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Verify a slot's output is safe to expose, then copy its playlists
/// onto the public names.
///
/// Returns [`Error::PublishNotReady`] when any verification step fails;
/// the caller retries. On success the public playlist pair is a
/// byte-for-byte copy of the slot's pair as observed playable here.
pub async fn publish_slot(dir: &Path, slot: Slot, min_segment_bytes: u64) -> Result<()> {
    let master_path = slot.master_playlist(dir);
    let stream_path = slot.stream_playlist(dir);

    let master = match tokio::fs::read(&master_path).await {
        Ok(bytes) if !bytes.is_empty() => bytes,
        Ok(_) => return Err(Error::PublishNotReady(format!("{} is empty", master_path.display()))),
        Err(e) => {
            return Err(Error::PublishNotReady(format!(
                "{} unreadable: {e}",
                master_path.display()
            )))
        }
    };
    let stream = match tokio::fs::read(&stream_path).await {
        Ok(bytes) if !bytes.is_empty() => bytes,
        Ok(_) => return Err(Error::PublishNotReady(format!("{} is empty", stream_path.display()))),
        Err(e) => {
            return Err(Error::PublishNotReady(format!(
                "{} unreadable: {e}",
                stream_path.display()
            )))
        }
    };

    let stream_text = String::from_utf8_lossy(&stream);
    let segments = referenced_segments(&stream_text, slot);
    if segments.len() < 2 {
        return Err(Error::PublishNotReady(format!(
            "slot {slot} lists {} segment(s), need 2",
            segments.len()
        )));
    }

    // Of the first three referenced segments, at least two must have
    // real payload on disk.
    let mut substantial = 0usize;
    for name in segments.iter().take(3) {
        if let Ok(meta) = tokio::fs::metadata(dir.join(name)).await {
            if meta.len() >= min_segment_bytes {
                substantial += 1;
            }
        }
    }
    if substantial < 2 {
        return Err(Error::PublishNotReady(format!(
            "slot {slot} has {substantial} substantial segment(s) among the first three"
        )));
    }

    for name in [PUBLIC_MASTER, PUBLIC_STREAM] {
        let target = dir.join(name);
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(target = %target.display(), error = %e, "failed to unlink old playlist"),
        }
    }

    tokio::fs::write(dir.join(PUBLIC_STREAM), &stream).await?;
    tokio::fs::write(dir.join(PUBLIC_MASTER), &master).await?;

    debug!(%slot, segments = segments.len(), "published slot");
    Ok(())
}

/// Remove a slot's playlists and segment files.
///
/// Used before spawning on a slot and after its transcoder has been
/// retired, so a fresh transcoder never interleaves with residue.
pub async fn prune_slot_files(dir: &Path, slot: Slot) {
    for path in [slot.stream_playlist(dir), slot.master_playlist(dir)] {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to prune playlist"),
        }
    }

    let prefix = slot.segment_prefix();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&prefix) && name.ends_with(".ts") {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                warn!(file = name, error = %e, "failed to prune segment");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const MIN: u64 = 5000;

    async fn write_slot(dir: &Path, slot: Slot, segments: &[(&str, usize)]) {
        let names: Vec<String> = segments.iter().map(|(n, _)| (*n).to_string()).collect();
        let playlist = format!(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n{}",
            names
                .iter()
                .map(|n| format!("#EXTINF:2.0,\n{n}\n"))
                .collect::<String>()
        );
        tokio::fs::write(slot.stream_playlist(dir), &playlist).await.unwrap();
        tokio::fs::write(
            slot.master_playlist(dir),
            format!("#EXTM3U\nstream_{}.m3u8\n", slot.as_str()),
        )
        .await
        .unwrap();
        for (name, size) in segments {
            tokio::fs::write(dir.join(name), vec![0u8; *size]).await.unwrap();
        }
    }

    fn dir() -> (tempfile::TempDir, PathBuf) {
        let d = tempfile::tempdir().unwrap();
        let p = d.path().to_path_buf();
        (d, p)
    }

    #[tokio::test]
    async fn refuses_missing_playlists() {
        let (_g, dir) = dir();
        let err = publish_slot(&dir, Slot::A, MIN).await.unwrap_err();
        assert!(matches!(err, Error::PublishNotReady(_)));
    }

    #[tokio::test]
    async fn refuses_single_segment() {
        let (_g, dir) = dir();
        write_slot(&dir, Slot::A, &[("segment_A_000.ts", 9000)]).await;
        let err = publish_slot(&dir, Slot::A, MIN).await.unwrap_err();
        assert!(matches!(err, Error::PublishNotReady(_)));
    }

    #[tokio::test]
    async fn refuses_undersized_segments() {
        let (_g, dir) = dir();
        write_slot(
            &dir,
            Slot::A,
            &[("segment_A_000.ts", 100), ("segment_A_001.ts", 9000)],
        )
        .await;
        let err = publish_slot(&dir, Slot::A, MIN).await.unwrap_err();
        assert!(matches!(err, Error::PublishNotReady(_)));
    }

    #[tokio::test]
    async fn ignores_other_slots_segments() {
        let (_g, dir) = dir();
        // Playlist for A referencing B's names never verifies.
        let playlist = "#EXTM3U\nsegment_B_000.ts\nsegment_B_001.ts\n";
        tokio::fs::write(Slot::A.stream_playlist(&dir), playlist).await.unwrap();
        tokio::fs::write(Slot::A.master_playlist(&dir), "#EXTM3U\n").await.unwrap();
        let err = publish_slot(&dir, Slot::A, MIN).await.unwrap_err();
        assert!(matches!(err, Error::PublishNotReady(_)));
    }

    #[tokio::test]
    async fn publishes_byte_identical_copies() {
        let (_g, dir) = dir();
        write_slot(
            &dir,
            Slot::B,
            &[("segment_B_004.ts", 8000), ("segment_B_005.ts", 8000)],
        )
        .await;

        publish_slot(&dir, Slot::B, MIN).await.unwrap();

        let public = tokio::fs::read(dir.join(PUBLIC_STREAM)).await.unwrap();
        let slot = tokio::fs::read(Slot::B.stream_playlist(&dir)).await.unwrap();
        assert_eq!(public, slot);

        let public = tokio::fs::read(dir.join(PUBLIC_MASTER)).await.unwrap();
        let slot = tokio::fs::read(Slot::B.master_playlist(&dir)).await.unwrap();
        assert_eq!(public, slot);
    }

    #[tokio::test]
    async fn republish_replaces_previous_pair() {
        let (_g, dir) = dir();
        write_slot(
            &dir,
            Slot::A,
            &[("segment_A_000.ts", 8000), ("segment_A_001.ts", 8000)],
        )
        .await;
        publish_slot(&dir, Slot::A, MIN).await.unwrap();

        write_slot(
            &dir,
            Slot::B,
            &[("segment_B_000.ts", 8000), ("segment_B_001.ts", 8000)],
        )
        .await;
        publish_slot(&dir, Slot::B, MIN).await.unwrap();

        let public = String::from_utf8(tokio::fs::read(dir.join(PUBLIC_STREAM)).await.unwrap())
            .unwrap();
        assert!(public.contains("segment_B_000.ts"));
        assert!(!public.contains("segment_A_000.ts"));
    }

    #[tokio::test]
    async fn prune_removes_only_that_slot() {
        let (_g, dir) = dir();
        write_slot(
            &dir,
            Slot::A,
            &[("segment_A_000.ts", 8000), ("segment_A_001.ts", 8000)],
        )
        .await;
        write_slot(
            &dir,
            Slot::B,
            &[("segment_B_000.ts", 8000), ("segment_B_001.ts", 8000)],
        )
        .await;

        prune_slot_files(&dir, Slot::A).await;

        assert!(!Slot::A.stream_playlist(&dir).exists());
        assert!(!dir.join("segment_A_000.ts").exists());
        assert!(Slot::B.stream_playlist(&dir).exists());
        assert!(dir.join("segment_B_000.ts").exists());
    }

    #[test]
    fn referenced_segments_dedupes_in_order() {
        let text = "segment_A_001.ts\nsegment_A_002.ts\nsegment_A_001.ts\n";
        assert_eq!(
            referenced_segments(text, Slot::A),
            vec!["segment_A_001.ts", "segment_A_002.ts"]
        );
    }
}
