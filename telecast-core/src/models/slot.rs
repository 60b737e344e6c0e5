use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One of the two alternating transcoder output slots inside a channel
/// directory. The public playlist points at exactly one slot at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    /// The opposite slot.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }

    #[must_use]
    pub fn stream_playlist(self, dir: &Path) -> PathBuf {
        dir.join(format!("stream_{}.m3u8", self.as_str()))
    }

    #[must_use]
    pub fn master_playlist(self, dir: &Path) -> PathBuf {
        dir.join(format!("master_{}.m3u8", self.as_str()))
    }

    /// ffmpeg segment filename template for this slot.
    #[must_use]
    pub fn segment_template(self, dir: &Path) -> PathBuf {
        dir.join(format!("segment_{}_%03d.ts", self.as_str()))
    }

    /// Prefix shared by every segment file this slot emits.
    #[must_use]
    pub fn segment_prefix(self) -> String {
        format!("segment_{}_", self.as_str())
    }

    /// Regex source matching this slot's segment filenames.
    #[must_use]
    pub fn segment_pattern(self) -> String {
        format!(r"segment_{}_\d+\.ts", self.as_str())
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable public playlist names inside a channel directory.
pub const PUBLIC_STREAM: &str = "stream.m3u8";
pub const PUBLIC_MASTER: &str = "master.m3u8";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_cover_both_sides() {
        assert_eq!(Slot::A.other(), Slot::B);
        assert_eq!(Slot::B.other(), Slot::A);
        assert_ne!(Slot::A, Slot::A.other());
    }

    #[test]
    fn filenames_are_slot_scoped() {
        let dir = Path::new("/tmp/ch");
        assert_eq!(
            Slot::A.stream_playlist(dir),
            PathBuf::from("/tmp/ch/stream_A.m3u8")
        );
        assert_eq!(
            Slot::B.master_playlist(dir),
            PathBuf::from("/tmp/ch/master_B.m3u8")
        );
        assert_eq!(
            Slot::B.segment_template(dir),
            PathBuf::from("/tmp/ch/segment_B_%03d.ts")
        );
    }

    #[test]
    fn segment_pattern_matches_emitted_names() {
        let re = regex::Regex::new(&Slot::A.segment_pattern()).unwrap();
        assert!(re.is_match("segment_A_007.ts"));
        assert!(!re.is_match("segment_B_007.ts"));
        assert!(!re.is_match("segment_A_.ts"));
    }
}
