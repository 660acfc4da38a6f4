//! The shared resource guarded by the protocol.

use async_trait::async_trait;
use ramutex_types::NodeId;
use std::time::Duration;
use tracing::info;

/// Work performed while holding the critical section.
///
/// The agent awaits `access` to completion before releasing; it must
/// eventually return.
#[async_trait]
pub trait SharedResource: Send + Sync + 'static {
    async fn access(&self, node: NodeId);
}

/// Stand-in for the shared audio track: holds it for a fixed time.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedTrack {
    hold: Duration,
}

impl SimulatedTrack {
    pub fn new(hold: Duration) -> Self {
        Self { hold }
    }
}

#[async_trait]
impl SharedResource for SimulatedTrack {
    async fn access(&self, node: NodeId) {
        info!(node, hold_ms = self.hold.as_millis() as u64, "Processing shared track");
        tokio::time::sleep(self.hold).await;
    }
}
