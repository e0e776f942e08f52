//! Reconnection backoff

use std::time::Duration;

/// Linear backoff with a hard ceiling.
///
/// Starts at zero so the first attempt is immediate. Each failure adds one
/// step until the ceiling is reached; a success resets to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    step: Duration,
    ceiling: Duration,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(step: Duration, ceiling: Duration) -> Self {
        Self { step, ceiling: ceiling.max(step), current: Duration::ZERO, failures: 0 }
    }

    /// Delay to wait after the last attempt before the next one.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Record a failed attempt and return the new delay.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.current = self.current.saturating_add(self.step).min(self.ceiling);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
        self.failures = 0;
    }
}
