//! Shared context handed to every op of a plan.

use crate::transport::Transport;
use ioswitch_core::error::{Result, SwitchError};
use ioswitch_core::SwitchConfig;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything an op needs besides the executor it binds against.
#[derive(Clone)]
pub struct ExecContext {
    /// Fires when the plan must stop: a sibling op failed, another leg of the
    /// execution failed, or the caller cancelled.
    pub cancel: CancellationToken,
    /// Route to other processes.
    pub transport: Arc<dyn Transport>,
    /// Runtime configuration.
    pub config: Arc<SwitchConfig>,
}

impl ExecContext {
    /// Create a context.
    pub fn new(
        cancel: CancellationToken,
        transport: Arc<dyn Transport>,
        config: Arc<SwitchConfig>,
    ) -> Self {
        Self {
            cancel,
            transport,
            config,
        }
    }

    /// Drive `fut` to completion unless the context is cancelled first.
    pub async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SwitchError::cancelled("plan cancelled")),
            out = fut => Ok(out),
        }
    }
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
