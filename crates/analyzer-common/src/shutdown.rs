//! Shared cancellation token for graceful shutdown.

use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The budget every binary gives its cooperative tasks to drain after
/// shutdown is signalled.
pub const SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);

/// Wraps a [`CancellationToken`] plus the set of tasks it governs, so a
/// `main()` can signal shutdown and await a bounded drain in one call.
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Installs a `ctrl_c` handler that cancels the token on signal.
    pub fn install_signal_handler(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                token.cancel();
            }
        });
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Awaits every task in `tasks` up to [`SHUTDOWN_BUDGET`]; anything
    /// still running past the budget is abandoned (and logged) rather than
    /// blocking the process exit indefinitely.
    pub async fn drain(self, mut tasks: JoinSet<()>) {
        let drain = async {
            while let Some(result) = tasks.join_next().await {
                if let Err(err) = result {
                    warn!(error = %err, "task exited with an error during shutdown");
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_BUDGET, drain).await.is_err() {
            warn!("shutdown budget exceeded, abandoning remaining tasks");
            tasks.abort_all();
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
