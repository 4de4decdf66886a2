use std::future::Future;
use std::time::Duration;

use rand::{thread_rng, Rng};
use tracing::debug;

use crate::RETRY_ATTEMPTS;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64, // 0.0 - 1.0
}

impl Default for RetryConfig {
    fn default() -> Self { Self { max_retries: 5, base_delay: Duration::from_millis(50), max_delay: Duration::from_millis(1500), jitter: 0.25 } }
}

impl RetryConfig {
    /// Backoff before retry number `attempt + 1`, jitter included.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exp = self.base_delay.mul_f64(2f64.powi(attempt.min(30) as i32));
        let delay = exp.min(self.max_delay);
        if self.jitter <= 0.0 { return delay; }
        let jitter_ms = (delay.as_millis() as f64 * self.jitter.min(1.0)) as i64;
        let offset = thread_rng().gen_range(-jitter_ms..=jitter_ms);
        Duration::from_millis((delay.as_millis() as i64 + offset).max(0) as u64)
    }
}

/// Retry `op` up to `cfg.max_retries` extra attempts. Errors for which `retryable` returns false
/// are returned immediately.
pub async fn retry_async_if<F, Fut, T, E, R>(cfg: &RetryConfig, mut op: F, retryable: R) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        RETRY_ATTEMPTS.add(1, &[]);
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= cfg.max_retries || !retryable(&e) => return Err(e),
            Err(_) => {
                let delay = cfg.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retry_backoff");
                tokio::time::sleep(delay).await;
            }
        }
        attempt += 1;
    }
}
