//! Structured logging setup.
//!
//! Installs a global `tracing-subscriber` formatter configured from
//! [`LoggingConfig`]. `RUST_LOG` takes precedence over the configured level.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Initialize the global subscriber.
///
/// A file target wins over the console when both are enabled. Calling this
/// more than once is harmless; later calls leave the first subscriber in place.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_ascii_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            ProtocolError::ConfigError("log_file_path must be set to log to a file".into())
        })?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open log file: {e}")))?;
        let builder = builder.with_writer(Mutex::new(file)).with_ansi(false);
        if config.json_format {
            let _ = builder.json().try_init();
        } else {
            let _ = builder.try_init();
        }
    } else if config.log_to_console {
        let builder = builder.with_writer(std::io::stderr);
        if config.json_format {
            let _ = builder.json().try_init();
        } else {
            let _ = builder.try_init();
        }
    }

    tracing::debug!(app = %config.app_name, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn file_target_without_path_is_rejected() {
        let config = LoggingConfig {
            log_to_file: true,
            log_file_path: None,
            ..LoggingConfig::default()
        };
        assert!(matches!(
            init_logging(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }

    #[test]
    fn repeated_initialization_is_harmless() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }
}
