use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use aiproxy_provider_core::{ProviderError, ProviderResult};

use crate::classify::is_non_retryable_message;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// ±fraction of the computed delay.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `n` (1-based): `min(base·factor^(n-1), max)`
    /// plus jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.factor.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = if self.jitter > 0.0 {
            let mut rng = rand::rng();
            rng.random_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        Duration::from_secs_f64((capped * (1.0 + jitter)).max(0.0))
    }
}

fn should_retry(err: &ProviderError) -> bool {
    err.retryable() && !is_non_retryable_message(&err.to_string())
}

/// Run `op` with exponential backoff. A non-retryable error stops retries
/// immediately; otherwise up to `max_retries` re-attempts are made.
pub async fn retry_with_backoff<T, F, Fut>(config: &RetryConfig, mut op: F) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !should_retry(&err) || attempt > config.max_retries {
                    return Err(err);
                }
                let delay = config.delay_for_attempt(attempt);
                warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying after error");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            jitter: 0.0,
            base_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn delays_grow_geometrically_and_cap() {
        let config = RetryConfig {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn retryable_errors_are_retried_up_to_the_limit() {
        let calls = AtomicU32::new(0);
        let result: ProviderResult<()> = retry_with_backoff(&no_jitter(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::NetworkTimeout("t".to_string())) }
        })
        .await;
        assert!(result.is_err());
        // Initial call plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_errors_stop_immediately() {
        let calls = AtomicU32::new(0);
        let result: ProviderResult<()> = retry_with_backoff(&no_jitter(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Unauthorized("denied".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_variant_with_fatal_message_stops() {
        let calls = AtomicU32::new(0);
        let result: ProviderResult<()> = retry_with_backoff(&no_jitter(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProviderError::Network(
                    "post failed: context canceled".to_string(),
                ))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_after_failures_returns_the_value() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&no_jitter(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::NetworkTimeout("t".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.expect("succeeds"), 2);
    }
}
