//! Tracing subscriber setup for processes embedding the I/O switch.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the hosting binary, which can use [`init_tracing`] to get the same
//! output formats in drivers and workers.
//!
//! # Configuration
//!
//! Format is controlled via `IOSWITCH_LOG_FORMAT`:
//! - `json` - Structured JSON output, one event per line
//! - `pretty` - Human-readable multi-line output
//! - `compact` - Compact single-line format
//!
//! Filtering uses `IOSWITCH_LOG_LEVEL`, falling back to `RUST_LOG`.
//!
//! # Example
//!
//! ```ignore
//! use ioswitch_executor::observability::{init_tracing, LogFormat, TracingConfig};
//!
//! let config = TracingConfig::builder()
//!     .log_format(LogFormat::Json)
//!     .log_filter("info,ioswitch_executor=debug")
//!     .build();
//! let _guard = init_tracing(config)?;
//! ```

mod config;
mod tracing_setup;

pub use config::{LogFormat, TracingConfig, TracingConfigBuilder};
pub use tracing_setup::{init_tracing, TracingGuard};
