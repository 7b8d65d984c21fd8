//! Time source for the orchestrator's waits
//!
//! The orchestrator never calls `tokio::time` directly, so tests can run the
//! full 120 second reconnect budget instantly with a manual clock.

use std::time::Duration;

use tokio::time::Instant;

/// Sleep and monotonic time
#[trait_variant::make(Clock: Send)]
pub trait LocalClock {
    /// Suspend the current task for `duration`
    async fn sleep(&self, duration: Duration);

    /// Current monotonic time
    fn now(&self) -> Instant;
}

/// Clock backed by `tokio::time`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;
