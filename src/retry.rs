use std::time::Duration;

use rand::Rng;

use tokio::time;

static MAX_BACKOFF_MS: u64 = 10_000;

/// Bounded exponential backoff for transient failures.
///
/// `max_attempts` is the number of retries after the initial attempt; delays
/// double per attempt, are capped, and carry random jitter so that competing
/// clients do not retry in lockstep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let exponential = base
            .saturating_mul(1u64 << attempt.min(16))
            .min(MAX_BACKOFF_MS);
        let jitter = if exponential == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=exponential / 2)
        };
        Duration::from_millis(exponential + jitter)
    }

    pub async fn backoff(&self, attempt: u32) {
        time::sleep(self.delay_for(attempt)).await;
    }
}
