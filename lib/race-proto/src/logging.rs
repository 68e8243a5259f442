//! Structured logging setup shared by the adapter's server and client roles.

use serde_derive::{Deserialize, Serialize};
use slog::Logger;
use sloggers::{Config, LoggerConfig};

/// Verbosity for the root logger. Deserializable so a host application can load it alongside
/// the rest of its config (see `race_adapter::config::AdapterConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// `false` discards everything, which is what the handshake/engine integration tests run
    /// with to keep output quiet.
    pub enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            enabled: true,
        }
    }
}

/// Builds the root logger for the process.
pub fn init(config: &LoggingConfig) -> Logger {
    if !config.enabled {
        return Logger::root(slog::Discard, slog::o!());
    }

    let toml = format!(
        r#"
type = "terminal"
level = "{}"
destination = "stderr"
"#,
        config.level.as_str()
    );

    let logger_config: LoggerConfig = serdeconv::from_toml_str(&toml).expect("invalid logging config");
    logger_config.build_logger().expect("failed to construct logger")
}
