use crate::error::AppError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        if scaled.is_finite() && scaled > 0.0 {
            Duration::from_millis(scaled.round().min(u64::MAX as f64) as u64)
        } else {
            Duration::ZERO
        }
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut retry = 0_u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && retry < self.max_retries => {
                    let delay = self.delay_for(retry);
                    warn!(
                        target: "market::retry",
                        request = label,
                        attempt = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "retrying upstream request"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
