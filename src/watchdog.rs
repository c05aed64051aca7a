use std::sync::atomic::{AtomicU64, Ordering};

const NO_HEARTBEAT: u64 = u64::MAX;

/// Tracks the upstream keep-alive. The heartbeat is written from the message
/// side and read by the poll loop; both go through a single atomic word so a
/// reader never sees a torn timestamp.
#[derive(Debug)]
pub struct HeartbeatWatchdog {
    last_heartbeat_ms: AtomicU64,
    threshold_ms: u64,
    grace_ms: u64,
    started_at_ms: u64,
}

impl HeartbeatWatchdog {
    pub fn new(threshold_ms: u64, grace_ms: u64, started_at_ms: u64) -> Self {
        Self {
            last_heartbeat_ms: AtomicU64::new(NO_HEARTBEAT),
            threshold_ms,
            grace_ms,
            started_at_ms,
        }
    }

    /// Last-write-wins update with the heartbeat's own timestamp.
    pub fn record(&self, stamp_ms: u64) {
        // The sentinel is reserved.
        let stamp_ms = stamp_ms.min(NO_HEARTBEAT - 1);
        self.last_heartbeat_ms.store(stamp_ms, Ordering::Release);
    }

    pub fn last_heartbeat(&self) -> Option<u64> {
        match self.last_heartbeat_ms.load(Ordering::Acquire) {
            NO_HEARTBEAT => None,
            stamp => Some(stamp),
        }
    }

    /// Stale when `now - last > threshold`, or when no heartbeat has ever been
    /// seen and the grace period since start has run out.
    pub fn is_stale(&self, now_ms: u64) -> bool {
        match self.last_heartbeat() {
            Some(last) => now_ms.saturating_sub(last) > self.threshold_ms,
            None => now_ms.saturating_sub(self.started_at_ms) >= self.grace_ms,
        }
    }

    pub fn threshold_ms(&self) -> u64 {
        self.threshold_ms
    }
}
