//! Per-call cancellation and deadline
//!
//! Every network step of an export runs under an [`ExportContext`]. When the
//! token fires or the deadline passes, the in-flight step is dropped and the
//! call returns `Error::Cancelled` or `Error::Timeout`. Whatever the storage
//! service already received stays there.

use std::future::Future;
use std::time::Duration;

use otelblob_common::{Error, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct ExportContext {
    token: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl ExportContext {
    /// No deadline, never cancelled unless [`cancel`](Self::cancel) is called
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().timeout(timeout)
    }

    /// Tie the context to an externally owned token, e.g. process shutdown.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Set a deadline `timeout` from now, keeping the earlier of the two if
    /// one is already set.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        match self.deadline {
            Some((existing, _)) if existing <= deadline => {}
            _ => self.deadline = Some((deadline, timeout)),
        }
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Time left before the deadline, `None` when there is none
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|(deadline, _)| deadline.saturating_duration_since(Instant::now()))
    }

    /// Drive `fut` unless the context ends first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(Error::Cancelled),
            () = self.expired() => Err(self.timeout_error()),
            result = fut => result,
        }
    }

    /// Sleep that ends early with an error when the context ends.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }

    async fn expired(&self) {
        match self.deadline {
            Some((deadline, _)) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    fn timeout_error(&self) -> Error {
        let millis = self.deadline.map_or(0, |(_, timeout)| timeout.as_millis());
        Error::Timeout(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_completes_without_deadline() {
        let ctx = ExportContext::new();
        assert_eq!(ctx.run(async { Ok(7) }).await.unwrap(), 7);
        assert!(ctx.remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts() {
        let ctx = ExportContext::with_timeout(Duration::from_millis(50));
        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(50)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_cancellation_returns_promptly() {
        let ctx = ExportContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = ctx.sleep(Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_work() {
        let ctx = ExportContext::new();
        ctx.cancel();
        let polled = AtomicBool::new(false);
        let err = ctx
            .run(async {
                polled.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let ctx =
            ExportContext::with_timeout(Duration::from_secs(1)).timeout(Duration::from_secs(60));
        assert!(ctx.remaining().unwrap() <= Duration::from_secs(1));
    }
}
