use anyhow::Result;
use log::{info, warn};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::core::cancel::CancelToken;
use crate::services::llm::LlmConfig;

const MAX_DELAY_SECS: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: 1.5,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut backoff = config.retry_backoff;
        if !backoff.is_finite() || backoff < 0.0 {
            warn!(
                "Invalid retry_backoff {}, using {}",
                backoff,
                Self::default().backoff
            );
            backoff = Self::default().backoff;
        }
        Self {
            attempts: config.retry_count.max(1),
            backoff,
        }
    }

    /// `backoff^attempt` seconds plus up to 0.2s of jitter, capped at five
    /// minutes. A negative or NaN backoff waits only the jitter.
    fn delay(&self, attempt: usize) -> Duration {
        let jitter: f64 = rand::rng().random_range(0.0..0.2);
        let secs = self.backoff.max(0.0).powi(attempt as i32) + jitter;
        Duration::from_secs_f64(secs.min(MAX_DELAY_SECS))
    }
}

/// Runs `op` until it succeeds or `policy.attempts` calls have failed, in
/// which case the last error is returned. Every error is retried.
///
/// `cancel` is checked after every failed call and again after the backoff
/// sleep; once set, no further call is made and `Ok(None)` is returned.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, cancel: &CancelToken, mut op: F) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(Some(value)),
            Err(e) if cancel.is_set() => {
                info!("Cancelled after failed attempt {}: {:#}", attempt + 1, e);
                return Ok(None);
            }
            Err(e) if attempt + 1 >= attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay(attempt);
                warn!(
                    "Attempt {}/{} failed: {:#}. Retrying in {:.2}s",
                    attempt + 1,
                    attempts,
                    e,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                if cancel.is_set() {
                    info!("Cancelled during retry backoff");
                    return Ok(None);
                }
                attempt += 1;
            }
        }
    }
}
