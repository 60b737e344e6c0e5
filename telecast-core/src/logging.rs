use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Engine internals tag records with `channel`, `slot`, and `role`
/// fields, so a directive like `telecast_core=debug` is usually enough
/// to follow one subsystem without drowning in the transcoder stderr
/// relay.
fn parse_level_filter(level: &str) -> anyhow::Result<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| anyhow::anyhow!("invalid logging.level {level:?}: {e}"))
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. A 24/7 channel host
/// mostly runs under a supervisor, so output goes to stdout by
/// default; `logging.file_path` appends to a plain-text file instead
/// (no ANSI escapes).
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_level_filter(&config.level)?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match &config.file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Arc::new(file))
                .try_init()
        }
        None => builder.try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_levels_and_directives_build() {
        assert!(parse_level_filter("info").is_ok());
        assert!(parse_level_filter("telecast_core=debug,warn").is_ok());
    }

    #[test]
    fn malformed_directives_are_refused() {
        assert!(parse_level_filter("telecast_core=notalevel").is_err());
    }
}
