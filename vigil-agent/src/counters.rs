//! Request-rate tracking for the transport layer
//!
//! Two independent reset-on-interval counters (per-second, per-minute),
//! owned by whoever serves the requests and handed to the sampling loop
//! by reference. No ambient global state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};

#[derive(Debug, Default)]
pub struct RequestCounters {
    this_second: AtomicU64,
    this_minute: AtomicU64,
}

impl RequestCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// One inbound request handled.
    pub fn record(&self) {
        self.this_second.fetch_add(1, Ordering::Relaxed);
        self.this_minute.fetch_add(1, Ordering::Relaxed);
    }

    pub fn per_second(&self) -> u64 {
        self.this_second.load(Ordering::Relaxed)
    }

    pub fn per_minute(&self) -> u64 {
        self.this_minute.load(Ordering::Relaxed)
    }

    pub fn reset_second(&self) {
        self.this_second.store(0, Ordering::Relaxed);
    }

    pub fn reset_minute(&self) {
        self.this_minute.store(0, Ordering::Relaxed);
    }

    /// Spawns the two reset timers. The handles are aborted at shutdown.
    pub fn spawn_reset_tasks(self: &Arc<Self>) -> [JoinHandle<()>; 2] {
        let second_counters = self.clone();
        let second_task = tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                second_counters.reset_second();
            }
        });
        let minute_counters = self.clone();
        let minute_task = tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(60));
            loop {
                tick.tick().await;
                minute_counters.reset_minute();
            }
        });
        [second_task, minute_task]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_increments_both_windows() {
        let counters = RequestCounters::default();
        counters.record();
        counters.record();
        assert_eq!(counters.per_second(), 2);
        assert_eq!(counters.per_minute(), 2);
    }

    #[test]
    fn resets_are_independent() {
        let counters = RequestCounters::default();
        for _ in 0..5 {
            counters.record();
        }
        counters.reset_second();
        assert_eq!(counters.per_second(), 0);
        assert_eq!(counters.per_minute(), 5);

        counters.record();
        counters.reset_minute();
        assert_eq!(counters.per_second(), 1);
        assert_eq!(counters.per_minute(), 0);
    }
}
