//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Signals every relay task to stop and bounds how long each may take.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait up to `timeout` for `handle`, aborting it afterwards.
    ///
    /// Returns `true` if the task finished on its own.
    pub async fn join_within(&self, task: &str, handle: JoinHandle<()>, timeout: Duration) -> bool {
        let abort = handle.abort_handle();
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {
                info!(task, "task stopped");
                true
            }
            Ok(Err(e)) => {
                warn!(task, error = %e, "task ended abnormally");
                true
            }
            Err(_) => {
                warn!(task, timeout_ms = timeout.as_millis() as u64, "task did not stop in time, aborting");
                abort.abort();
                false
            }
        }
    }
}
