//! Periodic request loop.
//!
//! After a startup delay the driver issues `rounds` critical-section requests,
//! sleeping `request_interval_ms` before each one. Shutdown is observed only
//! between rounds: a round that has started runs until its release, because
//! abandoning a request half-way would leave peers with a deferred ACK that
//! is never answered.

use crate::agent::MutexAgent;
use crate::error::KernelResult;

use ramutex_types::config::DriverConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Drives one agent through its configured rounds.
pub struct RequestDriver {
    agent: Arc<MutexAgent>,
    config: DriverConfig,
}

impl RequestDriver {
    pub fn new(agent: Arc<MutexAgent>, config: DriverConfig) -> Self {
        Self { agent, config }
    }

    /// Run until every round has completed or `shutdown` flips to `true`.
    ///
    /// Returns the number of completed rounds.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> KernelResult<u32> {
        let node = self.agent.id();
        let startup = Duration::from_millis(self.config.startup_delay_ms);
        let interval = Duration::from_millis(self.config.request_interval_ms);

        if !sleep_or_shutdown(startup, &mut shutdown).await {
            info!(node, "Driver: shutdown before first round");
            return Ok(0);
        }

        let mut completed = 0;
        while completed < self.config.rounds {
            if !sleep_or_shutdown(interval, &mut shutdown).await {
                info!(node, completed, "Driver: shutdown requested");
                return Ok(completed);
            }
            self.agent.run_round().await?;
            completed += 1;
            info!(node, round = completed, of = self.config.rounds, "Driver: round complete");
        }

        info!(node, completed, "Driver: all rounds complete");
        Ok(completed)
    }
}

/// Sleep for `duration`. Returns `false` if shutdown was signalled first
/// (or already had been).
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown.changed() => {
                // Sender gone: nobody can ask us to stop any more.
                if changed.is_err() {
                    (&mut sleep).await;
                    return true;
                }
                if *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}
