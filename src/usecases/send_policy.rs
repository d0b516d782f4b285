//! Outbound send decorators: token-bucket admission then bounded exponential retry.
//!
//! One [`SendPolicy`] per operation class (text, media, status). The engine wraps every
//! protocol send in `policy.run(...)`.

use crate::domain::DomainError;
use crate::shared::shutdown::{CancelRx, is_cancelled, sleep_or_cancel};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Backoff never grows past this.
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: `burst` capacity, one token every `every`.
#[derive(Debug)]
pub struct TokenBucket {
    every: Duration,
    burst: u32,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(every: Duration, burst: u32) -> Self {
        let burst = burst.max(1);
        Self {
            every,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill_per_second(&self) -> f64 {
        if self.every.is_zero() {
            f64::INFINITY
        } else {
            1.0 / self.every.as_secs_f64()
        }
    }

    fn refill_locked(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if elapsed <= f64::EPSILON {
            return;
        }
        let refill = elapsed * self.refill_per_second();
        state.tokens = (state.tokens + refill).min(self.burst as f64);
        state.last_refill = now;
    }

    /// Takes a token if one is available, otherwise returns how long until one is.
    fn try_take(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.refill_locked(&mut state, Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let missing = (1.0 - state.tokens).max(0.0);
            Err(Duration::from_secs_f64(missing / self.refill_per_second()))
        }
    }

    /// Blocks until a token is available or `cancel` fires.
    pub async fn acquire(&self, cancel: &mut CancelRx) -> Result<(), DomainError> {
        loop {
            if is_cancelled(cancel) {
                return Err(DomainError::Cancelled);
            }
            match self.try_take() {
                Ok(()) => return Ok(()),
                Err(wait) => sleep_or_cancel(wait.max(Duration::from_millis(1)), cancel).await?,
            }
        }
    }
}

/// Bounded retry with delay doubling up to [`MAX_BACKOFF`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Runs `op` until it succeeds or attempts run out. No sleep after the last attempt;
    /// a cancelled wait returns `DomainError::Cancelled`.
    pub async fn run<T, F, Fut>(&self, cancel: &mut CancelRx, mut op: F) -> Result<T, DomainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(e) => {
                    warn!(attempt, max = self.attempts, delay_ms = delay.as_millis() as u64, error = %e, "attempt failed, retrying");
                    sleep_or_cancel(delay, cancel).await?;
                    if delay < MAX_BACKOFF {
                        delay = (delay * 2).min(MAX_BACKOFF);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Admission gate followed by the retry loop.
#[derive(Debug)]
pub struct SendPolicy {
    pub limiter: TokenBucket,
    pub retry: RetryPolicy,
}

impl SendPolicy {
    pub fn new(limiter: TokenBucket, retry: RetryPolicy) -> Self {
        Self { limiter, retry }
    }

    /// Text: one token per 50ms, burst 5; 3 attempts from 250ms.
    pub fn text() -> Self {
        Self::new(
            TokenBucket::new(Duration::from_millis(50), 5),
            RetryPolicy::new(3, Duration::from_millis(250)),
        )
    }

    /// Media: one token per 150ms, burst 2; 3 attempts from 400ms.
    pub fn media() -> Self {
        Self::new(
            TokenBucket::new(Duration::from_millis(150), 2),
            RetryPolicy::new(3, Duration::from_millis(400)),
        )
    }

    /// Status: one token per 500ms, burst 1; 2 attempts from 600ms.
    pub fn status() -> Self {
        Self::new(
            TokenBucket::new(Duration::from_millis(500), 1),
            RetryPolicy::new(2, Duration::from_millis(600)),
        )
    }

    pub async fn run<T, F, Fut>(&self, cancel: &mut CancelRx, op: F) -> Result<T, DomainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        self.limiter.acquire(cancel).await?;
        self.retry.run(cancel, op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::shutdown::cancel_pair;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn assert_elapsed(start: Instant, expected: Duration) {
        let got = start.elapsed();
        assert!(
            got >= expected && got < expected + Duration::from_millis(5),
            "elapsed {got:?}, expected {expected:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_allows_burst_then_waits() {
        let (_tx, mut rx) = cancel_pair();
        let bucket = TokenBucket::new(Duration::from_millis(100), 3);
        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire(&mut rx).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(1));
        bucket.acquire(&mut rx).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(99), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(120), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_wait_is_cancellable() {
        let (tx, mut rx) = cancel_pair();
        let bucket = Arc::new(TokenBucket::new(Duration::from_secs(60), 1));
        bucket.acquire(&mut rx).await.unwrap();
        let b = Arc::clone(&bucket);
        let handle = tokio::spawn(async move { b.acquire(&mut rx).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        tx.send(true).unwrap();
        assert!(matches!(handle.await.unwrap(), Err(DomainError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_third_attempt_with_doubling() {
        let (_tx, mut rx) = cancel_pair();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(250));
        let start = Instant::now();
        let out = policy
            .run(&mut rx, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(DomainError::Gateway("boom".into()))
                    } else {
                        Ok("ID-1")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(out, "ID-1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 250 + 500
        assert_elapsed(start, Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_without_trailing_sleep() {
        let (_tx, mut rx) = cancel_pair();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(600));
        let start = Instant::now();
        let res: Result<(), _> = policy
            .run(&mut rx, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DomainError::Gateway("down".into())) }
            })
            .await;
        assert!(matches!(res, Err(DomainError::Gateway(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_elapsed(start, Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_capped() {
        let (_tx, mut rx) = cancel_pair();
        let policy = RetryPolicy::new(4, Duration::from_secs(3));
        let start = Instant::now();
        let _: Result<(), _> = policy
            .run(&mut rx, || async { Err(DomainError::Gateway("x".into())) })
            .await;
        // 3 + 5 + 5
        assert_elapsed(start, Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_returns_immediately() {
        let (_tx, mut rx) = cancel_pair();
        let policy = SendPolicy::text();
        let start = Instant::now();
        let v = policy.run(&mut rx, || async { Ok(7) }).await.unwrap();
        assert_eq!(v, 7);
        assert!(start.elapsed() < Duration::from_millis(1));
    }
}
