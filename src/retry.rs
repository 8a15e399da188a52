//! Bounded retry policy

use std::time::Duration;

/// Fixed-backoff retry bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Pause between consecutive attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Starting-cost queries against the ospfd vty
    pub const SESSION_QUERY: Self = Self {
        max_attempts: 10,
        backoff: Duration::from_secs(1),
    };

    /// Policy with `max_attempts` tries spaced by `backoff`
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self { max_attempts, backoff }
    }

    /// Delay to wait after failed `attempt` (1-based), or `None` when exhausted
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.backoff)
    }
}
