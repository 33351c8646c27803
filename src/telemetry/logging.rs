//! Logging configuration and initialization
//!
//! Console output in compact or JSON form, plus an optional non-blocking
//! log file.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "FILTER_PLAYER_LOG";
/// Environment variable selecting the output format ("json" or anything else)
pub const LOG_FORMAT_ENV: &str = "FILTER_PLAYER_LOG_FORMAT";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Enable console output (default: true)
    pub console_enabled: bool,
    /// Also write to this file
    pub file_path: Option<PathBuf>,
    /// Use JSON format for console logs (default: false)
    pub json_format: bool,
    /// Filter used when no environment filter is set (default: "info")
    pub default_level: String,
    /// Filter from the command line; beats the environment
    pub level_override: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
            file_path: None,
            json_format: false,
            default_level: "info".to_string(),
            level_override: None,
        }
    }
}

impl LogConfig {
    /// Filter directive in effect: command line, then `FILTER_PLAYER_LOG`,
    /// then `RUST_LOG`, then the default level
    pub fn filter_directive(&self) -> String {
        if let Some(level) = &self.level_override {
            return level.clone();
        }
        [LOG_ENV, "RUST_LOG"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| self.default_level.clone())
    }

    /// Whether console output should be JSON
    pub fn use_json(&self) -> bool {
        std::env::var(LOG_FORMAT_ENV)
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(self.json_format)
    }
}

/// Re-export so callers can hold on to the file writer guard
pub use tracing_appender::non_blocking::WorkerGuard as LogGuard;

/// Initialize the global subscriber
///
/// Returns the file writer guard when file logging is enabled; keep it alive
/// until exit so buffered lines are flushed.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let directive = config.filter_directive();
    let env_filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(&config.default_level));
    let use_json = config.use_json();

    let (file_layer, guard) = match &config.file_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::File::create(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_timer(fmt::time::uptime())
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let json_layer = (config.console_enabled && use_json).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
    });
    let console_layer = (config.console_enabled && !use_json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_thread_names(true)
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(json_layer)
        .with(console_layer)
        .try_init()?;

    tracing::info!(
        target: "filter_player",
        version = env!("CARGO_PKG_VERSION"),
        filter = %directive,
        json_format = use_json,
        file = ?config.file_path,
        "Logging initialized"
    );

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert!(config.console_enabled);
        assert!(config.file_path.is_none());
        assert!(!config.json_format);
        assert_eq!(config.default_level, "info");
    }

    #[test]
    fn test_level_override_wins() {
        let config = LogConfig {
            level_override: Some("filter_player=trace".into()),
            ..Default::default()
        };
        assert_eq!(config.filter_directive(), "filter_player=trace");
    }
}
