//! Retry engine (C4): wraps any fallible async operation with bounded
//! exponential backoff and jitter, classifying failures via
//! [`crate::error::Error::is_retryable`].
//!
//! Grounded on the retry loop in the teacher's HTTP client (`sleep_backoff` +
//! `should_retry` in `rpc::http`), generalized to work over any transport and
//! parameterized instead of hard-coded.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Backoff parameters. `delay(n) = min(base_ms * 2^(n-1), max_ms)`, then
/// jittered by a uniform fraction in `[jitter_min, jitter_max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter_min: f64,
    pub jitter_max: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { base_ms: 200, max_ms: 5_000, jitter_min: 0.0, jitter_max: 0.25 }
    }
}

impl RetryConfig {
    /// The un-jittered base delay for 1-indexed attempt `n`.
    pub fn base_delay(&self, attempt: u32) -> u64 {
        debug_assert!(attempt >= 1);
        let scaled = self.base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(62));
        scaled.min(self.max_ms)
    }

    /// The jittered delay for attempt `n`, using `rand_unit` (expected to
    /// return a value in `[0, 1)`, e.g. `fastrand::f64()`) to pick the
    /// jitter fraction within `[jitter_min, jitter_max]`.
    pub fn jittered_delay(&self, attempt: u32, rand_unit: f64) -> Duration {
        let base = self.base_delay(attempt) as f64;
        let span = (self.jitter_max - self.jitter_min).max(0.0);
        let frac = self.jitter_min + rand_unit * span;
        Duration::from_secs_f64((base * (1.0 + frac)) / 1000.0)
    }
}

/// Run `op` up to `max_attempts` times (≥1), retrying only failures that
/// `Error::is_retryable` accepts. `max_attempts = 1` (i.e. `retries = 0`)
/// performs exactly one attempt and never sleeps.
pub async fn run<F, Fut, T>(mut op: F, max_attempts: u32, cfg: &RetryConfig) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    assert!(max_attempts >= 1, "max_attempts must be at least 1");
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= max_attempts || !e.is_retryable() {
                    if attempt > 1 {
                        warn!(attempt, error = %e, "retry exhausted or non-retryable, surfacing last error");
                    }
                    return Err(e);
                }
                let delay = cfg.jittered_delay(attempt, fastrand::f64());
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying after backoff");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn base_delay_doubles_and_caps() {
        let cfg = RetryConfig { base_ms: 100, max_ms: 1_000, jitter_min: 0.0, jitter_max: 0.0 };
        assert_eq!(cfg.base_delay(1), 100);
        assert_eq!(cfg.base_delay(2), 200);
        assert_eq!(cfg.base_delay(3), 400);
        assert_eq!(cfg.base_delay(4), 800);
        assert_eq!(cfg.base_delay(5), 1_000); // capped
        assert_eq!(cfg.base_delay(10), 1_000);
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let cfg = RetryConfig { base_ms: 100, max_ms: 1_000, jitter_min: 0.1, jitter_max: 0.5 };
        for attempt in 1..=4u32 {
            for r in [0.0, 0.25, 0.5, 0.75, 0.999] {
                let d = cfg.jittered_delay(attempt, r).as_secs_f64() * 1000.0;
                let base = cfg.base_delay(attempt) as f64;
                assert!(d >= base * 1.1 - 1e-6, "d={d} base={base}");
                assert!(d <= base * 1.5 + 1e-6, "d={d} base={base}");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_one_attempt_no_sleep() {
        let calls = AtomicU32::new(0);
        let cfg = RetryConfig::default();
        let start = tokio::time::Instant::now();
        let res: Result<()> = run(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Network("boom".into())) }
            },
            1,
            &cfg,
        )
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let cfg = RetryConfig { base_ms: 10, max_ms: 100, jitter_min: 0.0, jitter_max: 0.0 };
        let res = run(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::Network("boom".into()))
                    } else {
                        Ok(42)
                    }
                }
            },
            5,
            &cfg,
        )
        .await
        .unwrap();
        assert_eq!(res, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_fails_fast() {
        let calls = AtomicU32::new(0);
        let cfg = RetryConfig::default();
        let res: Result<()> = run(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::rpc(-32601, "method not found", None)) }
            },
            5,
            &cfg,
        )
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
