//! Retry with exponential backoff
//!
//! Wraps an export step and repeats it while the error is retryable, the
//! elapsed-time budget allows another attempt and the context is still live.

use std::future::Future;
use std::time::Duration;

use otelblob_common::config::BackOffConfig;
use otelblob_common::{metrics, Result, SignalKind};
use rand::Rng;
use tokio::time::Instant;

use crate::context::ExportContext;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    enabled: bool,
    initial_interval: Duration,
    max_interval: Duration,
    /// `None` retries until the context ends
    max_elapsed_time: Option<Duration>,
    multiplier: f64,
    randomization_factor: f64,
}

impl From<&BackOffConfig> for BackoffPolicy {
    fn from(config: &BackOffConfig) -> Self {
        Self {
            enabled: config.enabled,
            initial_interval: Duration::from_millis(config.initial_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms),
            max_elapsed_time: (config.max_elapsed_time_ms > 0)
                .then(|| Duration::from_millis(config.max_elapsed_time_ms)),
            multiplier: config.multiplier,
            randomization_factor: config.randomization_factor.clamp(0.0, 1.0),
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&BackOffConfig::default())
    }
}

impl BackoffPolicy {
    /// Single attempt, errors are returned as they are
    pub fn disabled() -> Self {
        Self::from(&BackOffConfig::disabled())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Delay before retry `attempt` (1-indexed) without randomization
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.min(30) as i32 - 1;
        let millis = self.initial_interval.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_interval.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Base delay spread uniformly by `randomization_factor` in both directions
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.randomization_factor == 0.0 || base.is_zero() {
            return base;
        }
        let millis = base.as_millis() as f64;
        let spread = millis * self.randomization_factor;
        let jittered = rand::thread_rng().gen_range(millis - spread..=millis + spread);
        Duration::from_millis(jittered.max(0.0) as u64)
    }

    /// Run `operation` until it succeeds or retrying is no longer allowed.
    pub async fn run<T, F, Fut>(
        &self,
        ctx: &ExportContext,
        signal: SignalKind,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            let error = match ctx.run(operation()).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !self.enabled || !error.is_retryable() || ctx.is_cancelled() {
                return Err(error);
            }
            if ctx.remaining() == Some(Duration::ZERO) {
                return Err(error);
            }

            attempt += 1;
            let delay = self.delay_for_attempt(attempt);
            if let Some(budget) = self.max_elapsed_time {
                if start.elapsed() + delay > budget {
                    tracing::warn!(
                        signal = %signal,
                        attempts = attempt,
                        error = %error,
                        "Giving up on export after retry budget was spent"
                    );
                    return Err(error);
                }
            }

            tracing::warn!(
                signal = %signal,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Export failed, retrying"
            );
            metrics::record_retry(signal, attempt);
            ctx.sleep(delay).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otelblob_common::error::UploadError;
    use otelblob_common::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed(max_elapsed_ms: u64) -> BackoffPolicy {
        BackoffPolicy::from(&BackOffConfig {
            enabled: true,
            initial_interval_ms: 100,
            max_interval_ms: 1_000,
            max_elapsed_time_ms: max_elapsed_ms,
            multiplier: 2.0,
            randomization_factor: 0.0,
        })
    }

    fn unavailable() -> Error {
        UploadError::Service {
            status: 503,
            code: Some("ServerBusy".to_string()),
            message: "busy".to_string(),
        }
        .into()
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let policy = fixed(0);
        let delays: Vec<u64> = (1..=6)
            .map(|a| policy.base_delay(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, [100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(policy.base_delay(0), Duration::ZERO);
    }

    #[test]
    fn test_randomization_stays_in_range() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(1).as_millis();
            assert!((2_500..=7_500).contains(&delay), "{delay}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fixed(0)
            .run(&ExportContext::new(), SignalKind::Logs, || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(unavailable())
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = fixed(0)
            .run(&ExportContext::new(), SignalKind::Traces, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::from(UploadError::Service {
                    status: 403,
                    code: Some("AuthorizationFailure".to_string()),
                    message: "denied".to_string(),
                }))
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_bounds_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = fixed(350)
            .run(&ExportContext::new(), SignalKind::Metrics, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(unavailable())
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        // 100 + 200 fit in 350ms, a third delay of 400 does not.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_policy_tries_once() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let _ = BackoffPolicy::disabled()
            .run(&ExportContext::new(), SignalKind::Logs, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(unavailable())
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let ctx = ExportContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            canceller.cancel();
        });

        let err = fixed(0)
            .run(&ctx, SignalKind::Logs, || async { Err::<(), _>(unavailable()) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
