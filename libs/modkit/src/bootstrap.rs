//! Signal-driven shutdown for a process embedding the [`crate::manager::Manager`].

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ManagerError;
use crate::manager::Manager;

async fn wait_for_shutdown() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Installs `SIGINT`/`SIGTERM` handlers exactly once and owns the root
/// [`CancellationToken`]. A second signal arriving while shutdown is already
/// in flight forces an immediate process exit.
pub struct HostAdapter {
    cancel: CancellationToken,
}

impl HostAdapter {
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Spawns the signal waiter. Returns immediately; shutdown is driven by
    /// cancelling `self.cancel`, which callers should select on alongside
    /// their own run loop.
    pub fn install_signal_handlers(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            wait_for_shutdown().await;
            tracing::info!("shutdown signal received, initiating graceful shutdown");
            cancel.cancel();

            wait_for_shutdown().await;
            tracing::error!("second shutdown signal received, forcing exit");
            std::process::exit(1);
        });
    }

    /// Runs `manager.stop_modules()` against a deadline; exceeding it is a
    /// forced-exit condition per the exit-code table.
    ///
    /// # Errors
    /// Returns [`ManagerError::ShutdownTimeout`] if `stop_modules` does not
    /// complete within `deadline`.
    pub async fn stop_with_deadline(&self, manager: &Manager, deadline: Duration) -> Result<(), ManagerError> {
        tokio::select! {
            result = manager.stop_modules() => result,
            () = tokio::time::sleep(deadline) => Err(ManagerError::ShutdownTimeout {
                timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
