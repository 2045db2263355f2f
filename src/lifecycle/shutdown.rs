//! Shutdown coordination for the keeper.

use tokio_util::sync::CancellationToken;

/// Root cancellation scope for every long-running task.
///
/// Subsystems take a child token; triggering the root cancels them all.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown is triggered.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for SIGINT or SIGTERM, then trigger shutdown.
    pub async fn wait_for_signal(&self) {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Unable to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
            _ = terminate => tracing::info!("Received SIGTERM"),
            _ = self.token.cancelled() => {}
        }
        self.trigger();
    }
}
