//! End-to-end channel scenarios driven through the registry, with a
//! stub transcoder standing in for ffmpeg.
//!
//! The stub honors the supervisor's contract at the filesystem level:
//! it writes a playable slot (two fat segments plus both playlists),
//! then blocks forever in loop mode or sleeps out the "runtime" read
//! from its input file. An input of `crash:N` exits non-zero after N
//! seconds.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use telecast_core::catalog::Catalog;
use telecast_core::config::StreamingConfig;
use telecast_core::models::{ChannelId, ChannelStatus, EnqueueMovieRequest};
use telecast_core::registry::ChannelRegistry;

const STUB: &str = r#"#!/bin/sh
# Minimal HLS transcoder stand-in. The input file's content encodes the
# behavior: a runtime in seconds, `slow:D:R` to delay output by D, or
# `crash:R` to exit non-zero after R.
loop=0
input=""
out=""
prev=""
for a in "$@"; do
  case "$prev" in
    -i) input="$a" ;;
  esac
  if [ "$a" = "-stream_loop" ]; then loop=1; fi
  prev="$a"
  out="$a"
done
dur=$(cat "$input" 2>/dev/null || printf '1')
code=0
case "$dur" in
  slow:*) rest=${dur#slow:}; sleep "${rest%%:*}"; dur=${rest#*:} ;;
esac
case "$dur" in
  crash:*) code=1; dur=${dur#crash:} ;;
esac
dir=$(dirname "$out")
base=$(basename "$out" .m3u8)
slot=${base#stream_}
s0="segment_${slot}_000.ts"
s1="segment_${slot}_001.ts"
head -c 6000 /dev/zero > "$dir/$s0"
head -c 6000 /dev/zero > "$dir/$s1"
printf '#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXTINF:2.0,\n%s\n#EXTINF:2.0,\n%s\n' "$s0" "$s1" > "$dir/stream_${slot}.m3u8"
printf '#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nstream_%s.m3u8\n' "$slot" > "$dir/master_${slot}.m3u8"
if [ "$loop" = "1" ]; then
  sleep 3600
  exit 0
fi
sleep "$dur"
exit $code
"#;

struct Harness {
    _dir: tempfile::TempDir,
    media: PathBuf,
    registry: ChannelRegistry,
    id: ChannelId,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();

    let stub = root.join("stub-transcoder.sh");
    std::fs::write(&stub, STUB).expect("write stub");
    let mut perms = std::fs::metadata(&stub).expect("stub metadata").permissions();
    use std::os::unix::fs::PermissionsExt;
    perms.set_mode(0o755);
    std::fs::set_permissions(&stub, perms).expect("chmod stub");

    let media = root.join("media");
    std::fs::create_dir_all(&media).expect("media dir");
    let ad = media.join("ad.mp4");
    std::fs::write(&ad, "3600").expect("write ad");

    let mut streaming = StreamingConfig::default();
    streaming.ffmpeg_path = stub;
    streaming.ffprobe_path = root.join("no-ffprobe");
    streaming.output_root = root.join("hls_output");
    streaming.catalog_path = root.join("channels.json");
    streaming.ad_path = ad;
    streaming.readiness_poll_ms = 50;
    streaming.readiness_deadline_secs = 5;
    streaming.ad_stabilize_secs = 0;
    streaming.transition_settle_secs = 0;
    streaming.ad_restart_secs = 1;
    streaming.ad_restart_failure_secs = 1;
    streaming.publish_retry_ms = 50;
    streaming.preload_after_start_secs = 1;
    streaming.play_next_retry_secs = 1;
    streaming.preload_wait_secs = 1;
    streaming.probe_timeout_secs = 1;
    streaming.prune_delay_secs = 1;

    let catalog = Arc::new(
        Catalog::load(streaming.catalog_path.clone())
            .await
            .expect("catalog"),
    );
    let registry = ChannelRegistry::new(streaming, catalog);
    let id = ChannelId::from("scenario");
    registry.init_channel(&id, "Scenario").await.expect("init");

    Harness {
        _dir: dir,
        media,
        registry,
        id,
    }
}

impl Harness {
    fn movie(&self, title: &str, content: &str) -> EnqueueMovieRequest {
        let path = self.media.join(format!("{title}.mp4"));
        std::fs::write(&path, content).expect("write movie");
        EnqueueMovieRequest {
            title: title.to_string(),
            file_path: path,
            added_by: "tests".to_string(),
            file_size: content.len() as u64,
            format: Some("mp4".to_string()),
        }
    }

    async fn wait_for<F>(&self, what: &str, deadline: Duration, predicate: F) -> ChannelStatus
    where
        F: Fn(&ChannelStatus) -> bool,
    {
        let expires = tokio::time::Instant::now() + deadline;
        loop {
            let status = self.registry.status(&self.id).await.expect("status");
            if predicate(&status) {
                return status;
            }
            assert!(
                tokio::time::Instant::now() < expires,
                "timed out waiting for {what}; last status: {status:?}"
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn output_dir(&self) -> PathBuf {
        self.registry_output_root().join(self.id.as_str())
    }

    fn registry_output_root(&self) -> PathBuf {
        self._dir.path().join("hls_output")
    }
}

fn published_segments(dir: &Path) -> Vec<String> {
    let Ok(text) = std::fs::read_to_string(dir.join("stream.m3u8")) else {
        return Vec::new();
    };
    text.lines()
        .filter(|l| l.ends_with(".ts"))
        .map(ToString::to_string)
        .collect()
}

#[tokio::test]
async fn empty_start_settles_into_the_ad_loop() {
    let h = harness().await;

    let status = h
        .wait_for("ad on air", Duration::from_secs(15), |s| {
            s.playing_ad && s.is_playing
        })
        .await;
    assert!(status.current_movie.is_none());
    assert_eq!(status.queue_length, 0);

    let segments = published_segments(&h.output_dir());
    assert!(segments.len() >= 2, "published playlist too thin: {segments:?}");
    for name in &segments {
        let size = std::fs::metadata(h.output_dir().join(name))
            .expect("segment on disk")
            .len();
        assert!(size >= 5000, "{name} is only {size} bytes");
    }
    h.registry.shutdown_all();
}

#[tokio::test]
async fn first_enqueue_replaces_the_ad() {
    let h = harness().await;
    h.wait_for("ad on air", Duration::from_secs(15), |s| s.playing_ad)
        .await;

    let request = h.movie("night-train", "2");
    h.registry.enqueue(&h.id, request).await.expect("enqueue");

    let status = h
        .wait_for("movie on air", Duration::from_secs(20), |s| {
            s.current_movie.as_deref() == Some("night-train")
        })
        .await;
    assert!(status.is_playing);
    assert!(!status.playing_ad);
    assert_eq!(status.queue_length, 0);

    // The clip runs out after ~2s and the channel degrades back to ads.
    let status = h
        .wait_for("ad back on air", Duration::from_secs(20), |s| s.playing_ad)
        .await;
    assert!(status.current_movie.is_none());
    h.registry.shutdown_all();
}

#[tokio::test]
async fn two_movies_play_back_to_back() {
    let h = harness().await;
    h.wait_for("ad on air", Duration::from_secs(15), |s| s.playing_ad)
        .await;

    let first = h.movie("first", "3");
    let second = h.movie("second", "3");
    h.registry.enqueue(&h.id, first).await.expect("enqueue first");
    h.registry.enqueue(&h.id, second).await.expect("enqueue second");

    h.wait_for("first movie", Duration::from_secs(20), |s| {
        s.current_movie.as_deref() == Some("first")
    })
    .await;

    // The successor preloads while the first plays.
    h.wait_for("preload ready", Duration::from_secs(15), |s| s.preload_ready)
        .await;

    h.wait_for("second movie", Duration::from_secs(20), |s| {
        s.current_movie.as_deref() == Some("second")
    })
    .await;

    h.wait_for("queue drained to ad", Duration::from_secs(20), |s| {
        s.playing_ad && s.queue_length == 0
    })
    .await;
    h.registry.shutdown_all();
}

#[tokio::test]
async fn missing_file_is_dropped_and_the_ad_stays() {
    let h = harness().await;
    h.wait_for("ad on air", Duration::from_secs(15), |s| s.playing_ad)
        .await;

    let request = EnqueueMovieRequest {
        title: "ghost".to_string(),
        file_path: h.media.join("does-not-exist.mp4"),
        added_by: "tests".to_string(),
        file_size: 0,
        format: None,
    };
    h.registry.enqueue(&h.id, request).await.expect("enqueue");

    let status = h
        .wait_for("ghost dropped", Duration::from_secs(20), |s| {
            s.queue_length == 0 && s.playing_ad
        })
        .await;
    assert!(status.current_movie.is_none());
    h.registry.shutdown_all();
}

#[tokio::test]
async fn slow_preload_delays_but_does_not_lose_the_movie() {
    let h = harness().await;
    h.wait_for("ad on air", Duration::from_secs(15), |s| s.playing_ad)
        .await;

    // Output appears 3s after spawn, inside the readiness deadline; the
    // transition keeps retrying until the slot warms up.
    let request = h.movie("sluggish", "slow:3:3");
    h.registry.enqueue(&h.id, request).await.expect("enqueue");

    let status = h
        .wait_for("slow movie on air", Duration::from_secs(25), |s| {
            s.current_movie.as_deref() == Some("sluggish")
        })
        .await;
    assert!(status.is_playing);
    h.registry.shutdown_all();
}

#[tokio::test]
async fn crash_mid_movie_advances_the_queue() {
    let h = harness().await;
    h.wait_for("ad on air", Duration::from_secs(15), |s| s.playing_ad)
        .await;

    let doomed = h.movie("doomed", "crash:2");
    let survivor = h.movie("survivor", "3");
    h.registry.enqueue(&h.id, doomed).await.expect("enqueue doomed");
    h.registry.enqueue(&h.id, survivor).await.expect("enqueue survivor");

    h.wait_for("doomed movie", Duration::from_secs(20), |s| {
        s.current_movie.as_deref() == Some("doomed")
    })
    .await;

    // Crash is treated as completion; the next head takes over.
    h.wait_for("survivor movie", Duration::from_secs(20), |s| {
        s.current_movie.as_deref() == Some("survivor")
    })
    .await;
    h.registry.shutdown_all();
}
