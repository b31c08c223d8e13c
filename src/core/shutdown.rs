use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Graceful shutdown coordinator.
///
/// Uses `CancellationToken` to broadcast shutdown signals to all tasks.
/// Shutdown sequence:
/// 1. Set CancellationToken (broadcast to all tasks)
/// 2. Stop the retention reaper between passes
/// 3. Close HTTP server (drain in-flight requests)
/// 4. Exit with code 0
/// Total shutdown timeout: 30 seconds. After 30s, force exit with code 1.
///
/// In-flight downloads are dropped with the server; their extractor child
/// processes are killed and their staging directories removed.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns a clone of the cancellation token for use by tasks.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Triggers shutdown for all tasks listening on this token.
    pub fn trigger_shutdown(&self) {
        info!("shutdown signal received, broadcasting to all tasks");
        self.token.cancel();
    }

    /// Wait for a shutdown signal (SIGTERM or SIGINT) and trigger coordinated shutdown.
    pub async fn wait_for_signal_and_shutdown(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            info!("received SIGINT (Ctrl+C)");
                        }
                        _ = sigterm.recv() => {
                            info!("received SIGTERM");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler, waiting for Ctrl+C only");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("received SIGINT (Ctrl+C)");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received Ctrl+C");
        }

        self.trigger_shutdown();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Total shutdown timeout in seconds.
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Time allowed for in-flight HTTP requests to drain.
pub const HTTP_DRAIN_TIMEOUT_SECS: u64 = 25;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_cancels_every_clone() {
        let coordinator = ShutdownCoordinator::new();
        let a = coordinator.token();
        let b = coordinator.clone().token();
        assert!(!a.is_cancelled());

        coordinator.trigger_shutdown();

        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        a.cancelled().await;
    }
}
