//! Runtime configuration.

use crate::error::{Result, SwitchError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by drivers, workers and the ops they run.
///
/// # Example
///
/// ```
/// use ioswitch_core::SwitchConfig;
///
/// let config = SwitchConfig::default().with_plan_timeout_ms(60_000);
/// assert_eq!(config.plan_lookup_timeout_ms, 30_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// How long a worker waits for a plan to register before a Send/Get
    /// addressed to that plan fails.
    #[serde(default = "default_plan_lookup_timeout_ms")]
    pub plan_lookup_timeout_ms: u64,

    /// Overall deadline for one distributed execution (0 = none).
    #[serde(default)]
    pub plan_timeout_ms: u64,

    /// Buffer size for stream copies.
    #[serde(default = "default_stream_chunk_size")]
    pub stream_chunk_size: usize,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            plan_lookup_timeout_ms: default_plan_lookup_timeout_ms(),
            plan_timeout_ms: 0,
            stream_chunk_size: default_stream_chunk_size(),
        }
    }
}

impl SwitchConfig {
    /// Create configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `IOSWITCH_PLAN_LOOKUP_TIMEOUT_MS`
    /// - `IOSWITCH_PLAN_TIMEOUT_MS`
    /// - `IOSWITCH_STREAM_CHUNK_SIZE`
    ///
    /// Unset variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = env_parse("IOSWITCH_PLAN_LOOKUP_TIMEOUT_MS")? {
            config.plan_lookup_timeout_ms = v;
        }
        if let Some(v) = env_parse("IOSWITCH_PLAN_TIMEOUT_MS")? {
            config.plan_timeout_ms = v;
        }
        if let Some(v) = env_parse("IOSWITCH_STREAM_CHUNK_SIZE")? {
            config.stream_chunk_size = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from environment variables, falling back to
    /// defaults when they are malformed.
    pub fn from_env_or_default() -> Self {
        Self::from_env().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring invalid ioswitch environment configuration");
            Self::default()
        })
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.stream_chunk_size == 0 {
            return Err(SwitchError::ConfigValue {
                field: "stream_chunk_size".to_string(),
                cause: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Set the plan lookup timeout.
    pub fn with_plan_lookup_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.plan_lookup_timeout_ms = timeout_ms;
        self
    }

    /// Set the overall execution deadline (0 = none).
    pub fn with_plan_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.plan_timeout_ms = timeout_ms;
        self
    }

    /// Set the stream copy buffer size.
    pub fn with_stream_chunk_size(mut self, size: usize) -> Self {
        self.stream_chunk_size = size.max(1);
        self
    }

    /// Plan lookup timeout as a duration.
    pub fn plan_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.plan_lookup_timeout_ms)
    }

    /// Overall deadline as a duration, if one is set.
    pub fn plan_timeout(&self) -> Option<Duration> {
        (self.plan_timeout_ms > 0).then(|| Duration::from_millis(self.plan_timeout_ms))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| SwitchError::ConfigValue {
                field: key.to_string(),
                cause: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn default_plan_lookup_timeout_ms() -> u64 {
    30_000
}

fn default_stream_chunk_size() -> usize {
    64 * 1024
}
