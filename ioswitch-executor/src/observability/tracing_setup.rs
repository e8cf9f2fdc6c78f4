//! Tracing subscriber installation.

use anyhow::{Context, Result};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use super::{LogFormat, TracingConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the installed subscriber's configuration alive for the program.
#[derive(Debug)]
pub struct TracingGuard {
    format: LogFormat,
}

impl TracingGuard {
    /// The format the subscriber was installed with.
    pub fn format(&self) -> LogFormat {
        self.format
    }
}

/// Install a global tracing subscriber.
///
/// Invalid filter directives fall back to `info`. Fails if a global
/// subscriber is already installed.
pub fn init_tracing(config: TracingConfig) -> Result<TracingGuard> {
    let filter = EnvFilter::try_new(config.log_filter()).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(format_layer(&config))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(TracingGuard {
        format: config.log_format(),
    })
}

fn format_layer(config: &TracingConfig) -> BoxedLayer {
    let base = fmt::layer()
        .with_file(config.include_location())
        .with_line_number(config.include_location())
        .with_target(config.include_target())
        .with_thread_names(config.include_thread_names())
        .with_thread_ids(config.include_thread_ids());

    match config.log_format() {
        LogFormat::Json => base
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .flatten_event(true)
            .boxed(),
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Compact => base.compact().boxed(),
    }
}
