//! Configuration types for tracing output.

use std::env;
use std::str::FromStr;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Human-readable multi-line format.
    Pretty,
    /// Compact single-line format.
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        })
    }
}

/// Configuration for the tracing subscriber.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    log_format: LogFormat,
    log_filter: String,
    include_location: bool,
    include_target: bool,
    include_thread_names: bool,
    include_thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_filter: "info".to_string(),
            include_location: false,
            include_target: true,
            include_thread_names: false,
            include_thread_ids: false,
        }
    }
}

impl TracingConfig {
    /// Create a new builder.
    pub fn builder() -> TracingConfigBuilder {
        TracingConfigBuilder::default()
    }

    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `IOSWITCH_LOG_FORMAT`: "json", "pretty", or "compact"
    ///   (defaults to pretty on a terminal, JSON otherwise)
    /// - `IOSWITCH_LOG_LEVEL` or `RUST_LOG`: filter directives
    /// - `IOSWITCH_LOG_LOCATION`, `IOSWITCH_LOG_THREAD_NAMES`,
    ///   `IOSWITCH_LOG_THREAD_IDS`: "true"/"1" to enable
    pub fn from_env() -> Self {
        let log_format = env::var("IOSWITCH_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse::<LogFormat>().ok())
            .unwrap_or_else(|| {
                if std::io::IsTerminal::is_terminal(&std::io::stdout()) {
                    LogFormat::Pretty
                } else {
                    LogFormat::Json
                }
            });

        let log_filter = env::var("IOSWITCH_LOG_LEVEL")
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());

        Self {
            log_format,
            log_filter,
            include_location: env_flag("IOSWITCH_LOG_LOCATION"),
            include_target: true,
            include_thread_names: env_flag("IOSWITCH_LOG_THREAD_NAMES"),
            include_thread_ids: env_flag("IOSWITCH_LOG_THREAD_IDS"),
        }
    }

    /// Get the log format.
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Get the filter directives.
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Check if source location should be included.
    pub fn include_location(&self) -> bool {
        self.include_location
    }

    /// Check if the event target should be included.
    pub fn include_target(&self) -> bool {
        self.include_target
    }

    /// Check if thread names should be included.
    pub fn include_thread_names(&self) -> bool {
        self.include_thread_names
    }

    /// Check if thread IDs should be included.
    pub fn include_thread_ids(&self) -> bool {
        self.include_thread_ids
    }
}

/// Builder for [`TracingConfig`].
#[derive(Debug, Clone, Default)]
pub struct TracingConfigBuilder {
    config: TracingConfig,
}

impl TracingConfigBuilder {
    /// Set the log format.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log_format = format;
        self
    }

    /// Set the filter directives (e.g. `"info,ioswitch_executor=debug"`).
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.log_filter = filter.into();
        self
    }

    /// Include source file and line in events.
    pub fn include_location(mut self, include: bool) -> Self {
        self.config.include_location = include;
        self
    }

    /// Include the event target.
    pub fn include_target(mut self, include: bool) -> Self {
        self.config.include_target = include;
        self
    }

    /// Include thread names.
    pub fn include_thread_names(mut self, include: bool) -> Self {
        self.config.include_thread_names = include;
        self
    }

    /// Include thread IDs.
    pub fn include_thread_ids(mut self, include: bool) -> Self {
        self.config.include_thread_ids = include;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> TracingConfig {
        self.config
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|s| s.eq_ignore_ascii_case("true") || s == "1")
        .unwrap_or(false)
}
