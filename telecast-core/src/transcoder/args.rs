//! ffmpeg argument construction for HLS slot output.

use std::path::Path;

use crate::config::StreamingConfig;
use crate::models::Slot;

use super::TranscoderRole;

/// Escape a string for use inside a drawtext filter value.
fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace(':', "\\:")
}

/// Build the full argv (after the program name) for one slot spawn.
///
/// Ads loop their input forever and never write an ENDLIST; movies play
/// through once so their natural exit drives the next transition.
pub fn build_args(
    streaming: &StreamingConfig,
    input: &Path,
    output_dir: &Path,
    slot: Slot,
    role: TranscoderRole,
    title: &str,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "warning".into(),
        "-stats".into(),
        "-re".into(),
    ];

    if role == TranscoderRole::Ad {
        args.extend(["-stream_loop".into(), "-1".into()]);
    }

    args.extend(["-i".into(), input.to_string_lossy().into_owned()]);

    // Channel watermark on everything; movies also carry their title.
    let watermark = escape_drawtext(&streaming.watermark);
    let mut filter = format!(
        "drawtext=text='{watermark}':x=w-tw-16:y=16:fontsize=20:fontcolor=white@0.7"
    );
    if role == TranscoderRole::Movie {
        let title = escape_drawtext(title);
        filter.push_str(&format!(
            ",drawtext=text='{title}':x=16:y=h-th-16:fontsize=16:fontcolor=white@0.5"
        ));
    }
    args.extend(["-vf".into(), filter]);

    let segment = streaming.segment_seconds;
    args.extend([
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-crf".into(),
        "23".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-sc_threshold".into(),
        "0".into(),
        "-force_key_frames".into(),
        format!("expr:gte(t,n_forced*{segment})"),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "128k".into(),
        "-ac".into(),
        "2".into(),
    ]);

    let mut hls_flags = "delete_segments+independent_segments".to_string();
    if role == TranscoderRole::Ad {
        hls_flags.push_str("+omit_endlist");
    }

    args.extend([
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        segment.to_string(),
        "-hls_list_size".into(),
        streaming.playlist_window.to_string(),
        "-hls_flags".into(),
        hls_flags,
        "-hls_segment_filename".into(),
        slot.segment_template(output_dir).to_string_lossy().into_owned(),
        "-master_pl_name".into(),
        format!("master_{}.m3u8", slot.as_str()),
        slot.stream_playlist(output_dir).to_string_lossy().into_owned(),
    ]);

    args
}
