//! Request pacing and retry policy.
//!
//! The [`Throttle`] decides how often we are allowed to talk to the API at
//! all; the [`RetryPolicy`] decides what happens after a call failed. The two
//! are independent: a retry still has to acquire a throttle token.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::time;
use tracing::warn;

use crate::constants::{MAX_RATE_LIMIT_BACKOFF_SECS, MAX_RUN_RETRIES, RETRY_BACKOFF_SECS};

/// Async token bucket. Holds up to `capacity` tokens and earns one token per
/// `interval`. A zero interval never waits.
pub struct Throttle {
    limiter: Option<DefaultDirectRateLimiter>,
}

impl Throttle {
    pub fn new(capacity: u32, interval: Duration) -> Self {
        let burst = NonZeroU32::new(capacity).unwrap_or(NonZeroU32::MIN);
        let limiter = Quota::with_period(interval)
            .map(|quota| RateLimiter::direct(quota.allow_burst(burst)));
        Self { limiter }
    }

    /// One request per `interval`, no burst.
    pub fn every(interval: Duration) -> Self {
        Self::new(1, interval)
    }

    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    /// Waits until a token is available and takes it.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

/// Errors that know whether the provider throttled us.
pub trait Retryable {
    fn is_rate_limited(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RUN_RETRIES,
            backoff: Duration::from_secs(RETRY_BACKOFF_SECS),
            max_backoff: Duration::from_secs(MAX_RATE_LIMIT_BACKOFF_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based). Ordinary failures wait a
    /// fixed `backoff`; throttling errors back off exponentially with ±25%
    /// jitter, capped at `max_backoff`.
    pub fn delay_for(&self, retry: u32, rate_limited: bool) -> Duration {
        if !rate_limited {
            return self.backoff;
        }

        let shift = retry.saturating_sub(1).min(16);
        let base = self.backoff.saturating_mul(1 << shift).min(self.max_backoff);
        jitter(base)
    }
}

fn jitter(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let range = base_ms / 4;
    if range == 0 {
        return base;
    }
    let offset = rand::rng().random_range(0..=range * 2);
    Duration::from_millis(base_ms - range + offset)
}

/// Runs `op` until it succeeds or `policy.max_retries` retries are spent.
/// The last error is returned once the budget is exhausted.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retries = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if retries < policy.max_retries => {
                retries += 1;
                let delay = policy.delay_for(retries, err.is_rate_limited());
                warn!(
                    what,
                    retry = retries,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "{err}; retrying"
                );
                time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
