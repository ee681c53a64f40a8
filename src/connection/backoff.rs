//! Reconnect backoff schedule: exponential doubling with a cap and jitter.

use std::time::Duration;

use rand::Rng;

/// Deterministic exponential backoff, capped at a maximum delay.
///
/// Attempt `n` (1-based) waits `min(initial * 2^(n-1), max)`. The schedule is
/// monotonically non-decreasing, so a flapping gateway sees retry pressure
/// back off rather than oscillate.
#[derive(Debug, Clone, Copy)]
pub struct BackoffSchedule {
    initial: Duration,
    max: Duration,
}

impl BackoffSchedule {
    /// Create a schedule from the initial and maximum delay.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let initial_ms = u64::try_from(self.initial.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        let exponent = attempt.saturating_sub(1);
        let factor = 2u64.saturating_pow(exponent);
        Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
    }

    /// Delay for `attempt` with jitter drawn uniformly from `[d/2, d]`.
    ///
    /// Because the deterministic delay doubles per attempt, the jittered
    /// value for attempt `n+1` can never undercut attempt `n` below the cap.
    pub fn jittered(&self, attempt: u32) -> Duration {
        let full = u64::try_from(self.delay_for(attempt).as_millis()).unwrap_or(u64::MAX);
        if full == 0 {
            return Duration::ZERO;
        }
        let half = full.saturating_div(2);
        let ms = rand::thread_rng().gen_range(half..=full);
        Duration::from_millis(ms)
    }
}
