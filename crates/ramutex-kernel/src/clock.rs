//! Lamport logical clock.

use std::sync::Mutex;

/// A Lamport clock behind its own lock.
///
/// `tick` is used for every send, `observe` for every receive; both return
/// the new value, so the clock strictly increases across events.
#[derive(Debug, Default)]
pub struct LamportClock {
    value: Mutex<u64>,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value.
    pub fn now(&self) -> u64 {
        *self.value.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Local event: advance by one.
    pub fn tick(&self) -> u64 {
        let mut value = self.value.lock().unwrap_or_else(|e| e.into_inner());
        *value = value.saturating_add(1);
        *value
    }

    /// Receive event: `max(local, remote) + 1`.
    pub fn observe(&self, remote: u64) -> u64 {
        let mut value = self.value.lock().unwrap_or_else(|e| e.into_inner());
        *value = (*value).max(remote).saturating_add(1);
        *value
    }
}
