use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub streaming: StreamingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// CORS allowed origins. Empty means allow any origin, which is
    /// acceptable because the API carries no credentials.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            cors_allowed_origins: Vec::new(),
        }
    }
}

/// Everything the playback engine needs to drive ffmpeg and its output tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Root under which each channel gets `<output_root>/<channel_id>/`.
    pub output_root: PathBuf,
    /// Persisted channel catalog.
    pub catalog_path: PathBuf,
    /// The looping filler clip played while a channel's queue is empty.
    pub ad_path: PathBuf,
    /// Watermark burned into every stream.
    pub watermark: String,

    pub segment_seconds: u32,
    pub playlist_window: u32,
    /// A segment smaller than this is not yet playable.
    pub min_segment_bytes: u64,

    pub readiness_poll_ms: u64,
    pub readiness_deadline_secs: u64,
    /// Delay between ad readiness and first publish, letting the rolling
    /// window fill past a single segment.
    pub ad_stabilize_secs: u64,
    /// Settle delay between a transcoder exit and the slot swap.
    pub transition_settle_secs: u64,
    pub ad_restart_secs: u64,
    pub ad_restart_failure_secs: u64,
    pub publish_retries: u32,
    pub publish_retry_ms: u64,
    /// How long after a movie starts before its successor is preloaded.
    pub preload_after_start_secs: u64,
    pub play_next_retry_secs: u64,
    /// Re-check interval while an in-flight preload blocks a transition.
    pub preload_wait_secs: u64,
    pub probe_timeout_secs: u64,
    pub fallback_duration_mins: u64,
    /// How long a vacated slot keeps its files after a swap, for viewers
    /// still draining the previous playlist.
    pub prune_delay_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            output_root: PathBuf::from("hls_output"),
            catalog_path: PathBuf::from("channels.json"),
            ad_path: PathBuf::from("assets/ad.mp4"),
            watermark: "TELECAST".to_string(),
            segment_seconds: 2,
            playlist_window: 6,
            min_segment_bytes: 5000,
            readiness_poll_ms: 500,
            readiness_deadline_secs: 20,
            ad_stabilize_secs: 3,
            transition_settle_secs: 2,
            ad_restart_secs: 1,
            ad_restart_failure_secs: 5,
            publish_retries: 3,
            publish_retry_ms: 500,
            preload_after_start_secs: 10,
            play_next_retry_secs: 5,
            preload_wait_secs: 3,
            probe_timeout_secs: 10,
            fallback_duration_mins: 90,
            prune_delay_secs: 5,
        }
    }
}

impl StreamingConfig {
    #[must_use]
    pub fn readiness_poll(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_ms)
    }

    #[must_use]
    pub fn readiness_deadline(&self) -> Duration {
        Duration::from_secs(self.readiness_deadline_secs)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    #[must_use]
    pub fn fallback_duration(&self) -> Duration {
        Duration::from_secs(self.fallback_duration_mins * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive: a plain level ("info") or a full
    /// per-target filter ("telecast_core=debug,warn").
    pub level: String,
    /// Append logs to this file instead of stdout.
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration with priority: environment variables over the
    /// config file over defaults.
    fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, config::FileFormat::Yaml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TELECAST")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path, layered under environment overrides
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Validate configuration, collecting every problem before failing.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be between 1 and 65535, got 0".to_string());
        }
        if self.streaming.segment_seconds == 0 {
            errors.push("streaming.segment_seconds must be greater than 0".to_string());
        }
        if self.streaming.playlist_window < 2 {
            errors.push(format!(
                "streaming.playlist_window must be at least 2, got {}",
                self.streaming.playlist_window
            ));
        }
        if self.streaming.readiness_poll_ms == 0 {
            errors.push("streaming.readiness_poll_ms must be greater than 0".to_string());
        }
        if self.streaming.publish_retries == 0 {
            errors.push("streaming.publish_retries must be greater than 0".to_string());
        }
        if self.streaming.watermark.is_empty() {
            errors.push("streaming.watermark must not be empty".to_string());
        }
        if self.streaming.output_root.as_os_str().is_empty() {
            errors.push("streaming.output_root must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Load configuration from config file or environment variables.
///
/// Config file search order:
/// 1. `TELECAST_CONFIG_PATH` environment variable (explicit path)
/// 2. `./config.yaml` (current working directory)
/// 3. Fall back to environment variables only
pub fn load_config() -> anyhow::Result<Config> {
    let config_path = std::env::var("TELECAST_CONFIG_PATH")
        .ok()
        .filter(|p| std::path::Path::new(p).exists())
        .or_else(|| {
            let cwd = "config.yaml";
            std::path::Path::new(cwd)
                .exists()
                .then(|| cwd.to_string())
        });

    let config = if let Some(path) = config_path {
        Config::from_file(&path)
            .map_err(|e| anyhow::anyhow!("failed to load config from {path}: {e}"))?
    } else {
        Config::from_env().unwrap_or_default()
    };

    if let Err(errors) = config.validate() {
        anyhow::bail!(
            "configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        );
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.http_address(), "0.0.0.0:8080");
    }

    #[test]
    fn validation_collects_all_errors() {
        let mut config = Config::default();
        config.server.http_port = 0;
        config.streaming.segment_seconds = 0;
        config.streaming.playlist_window = 1;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn default_timings_match_the_engine_contract() {
        let streaming = StreamingConfig::default();
        assert_eq!(streaming.readiness_poll(), Duration::from_millis(500));
        assert_eq!(streaming.readiness_deadline(), Duration::from_secs(20));
        assert_eq!(streaming.fallback_duration(), Duration::from_secs(90 * 60));
        assert_eq!(streaming.min_segment_bytes, 5000);
    }
}
