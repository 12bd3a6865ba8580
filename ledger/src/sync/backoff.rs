use rand::Rng;
use std::time::Duration;

/// Exponential retry delay with jitter, capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    /// Consecutive failures since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next retry: `initial * 2^attempt` plus up to 25%
    /// jitter, never more than `max`
    pub fn next_delay(&mut self) -> Duration {
        let power = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let base = self.initial.saturating_mul(power).min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        let jitter_ceiling = base.as_millis() as u64 / 4;
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ceiling)
        };

        (base + Duration::from_millis(jitter)).min(self.max)
    }
}
