//! Retry backoff policy
//!
//! One policy for every transport call site (queue receive, blob fetch)
//! instead of scattered fixed sleeps. Exponential growth from a base delay
//! up to a cap, with full jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use shared::PipelineError;

#[derive(Debug, Clone)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_millis(200),
            cap: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            cap,
        }
    }

    /// Upper bound of the delay before retry number `attempt` (1-based).
    pub fn max_delay(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(1u32 << attempt.min(16).saturating_sub(1));
        exp.min(self.cap)
    }

    /// Jittered delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let max = self.max_delay(attempt);
        if max.is_zero() {
            return max;
        }
        let millis = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
        Duration::from_millis(millis)
    }

    /// Run `op`, retrying transport errors until the attempt budget is spent.
    /// Non-transport errors propagate immediately.
    pub async fn retry<T, F, Fut>(&self, what: &str, op: F) -> Result<T, PipelineError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transport() && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    let pause = self.delay(attempt);
                    tracing::warn!(
                        what,
                        attempt,
                        delay_ms = pause.as_millis() as u64,
                        error = %e,
                        "transport error, backing off"
                    );
                    tokio::time::sleep(pause).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
