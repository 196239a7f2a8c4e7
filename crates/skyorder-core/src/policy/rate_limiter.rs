//! Token bucket rate limiter with a FIFO wait queue.
//!
//! Tokens accrue at `requests_per_second` up to `bucket_size`. `acquire`
//! consumes one whole token when available and otherwise parks the caller in
//! a FIFO queue. While the queue is non-empty a ticker task owned by the
//! limiter refills the bucket every `poll_interval` and hands tokens to
//! waiters in arrival order; it stops as soon as the queue drains, so an idle
//! limiter has no task running.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::error::AdmissionError;

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Token refill rate.
    pub requests_per_second: f64,
    /// Maximum tokens in the bucket (burst size).
    pub bucket_size: u32,
    /// How often queued callers are re-checked.
    pub poll_interval_ms: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            bucket_size: 10,
            poll_interval_ms: 100,
        }
    }
}

impl RateLimiterConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Token bucket state. Not synchronised on its own; [`RateLimiter`] guards it.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    ///
    /// A negative or non-finite `refill_rate` is treated as 0 (no refill) and
    /// a zero `capacity` as 1, so the bucket can always hold one whole token.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        let capacity = capacity.max(1);
        let refill_rate = if refill_rate.is_finite() && refill_rate > 0.0 {
            refill_rate
        } else {
            0.0
        };
        Self {
            capacity: f64::from(capacity),
            refill_rate,
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
        }
    }

    /// Add `elapsed * refill_rate` tokens, capped at capacity.
    pub fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Consume one whole token if there is one.
    pub fn try_take(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available.
    pub fn available(&self) -> u32 {
        self.tokens.floor() as u32
    }

    /// Estimated time until one whole token is available. Saturates at
    /// [`Duration::MAX`] when the rate is too small for the wait to be
    /// representable, or when the bucket never refills.
    pub fn wait_time(&self) -> Duration {
        let deficit = 1.0 - self.tokens;
        if deficit <= 0.0 {
            Duration::ZERO
        } else if self.refill_rate <= 0.0 {
            Duration::MAX
        } else {
            Duration::try_from_secs_f64(deficit / self.refill_rate).unwrap_or(Duration::MAX)
        }
    }

    fn refund(&mut self) {
        self.tokens = (self.tokens + 1.0).min(self.capacity);
    }

    fn fill(&mut self) {
        self.tokens = self.capacity;
        self.last_refill = Instant::now();
    }
}

struct Waiter {
    tx: oneshot::Sender<Result<(), AdmissionError>>,
    enqueued_at: Instant,
}

struct LimiterState {
    bucket: TokenBucket,
    queue: VecDeque<Waiter>,
    ticker: Option<JoinHandle<()>>,
    closed: bool,
}

impl LimiterState {
    /// Hand available tokens to queued callers, oldest first. Callers that
    /// gave up waiting are dropped without consuming a token.
    fn grant_waiters(&mut self) {
        loop {
            match self.queue.front() {
                None => break,
                Some(waiter) if waiter.tx.is_closed() => {
                    self.queue.pop_front();
                    continue;
                }
                Some(_) => {}
            }
            if !self.bucket.try_take() {
                break;
            }
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            let waited = waiter.enqueued_at.elapsed();
            if waiter.tx.send(Ok(())).is_err() {
                self.bucket.refund();
                continue;
            }
            tracing::debug!(
                waited_ms = waited.as_millis() as u64,
                queue_len = self.queue.len(),
                "rate limiter admitted queued request"
            );
        }
    }

    fn cancel_waiters(&mut self) -> usize {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        let cancelled = self.queue.len();
        for waiter in self.queue.drain(..) {
            let _ = waiter.tx.send(Err(AdmissionError::Reset));
        }
        self.bucket.fill();
        cancelled
    }
}

struct Shared {
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One ticker step. Returns `true` once the queue has drained and the
    /// ticker has been released.
    fn process_queue(&self) -> bool {
        let mut state = self.lock();
        state.bucket.refill();
        state.grant_waiters();
        if state.queue.is_empty() {
            state.ticker = None;
            tracing::trace!("rate limiter queue drained");
            true
        } else {
            false
        }
    }
}

async fn run_ticker(limiter: Weak<Shared>, period: Duration) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(shared) = limiter.upgrade() else {
            return;
        };
        if shared.process_queue() {
            return;
        }
    }
}

/// Async admission gate shared by every request a client sends.
///
/// Cloning yields another handle to the same bucket and queue.
#[derive(Clone)]
pub struct RateLimiter {
    shared: Arc<Shared>,
}

impl RateLimiter {
    /// Build a limiter from `config`.
    ///
    /// Configs are expected to have passed
    /// [`ClientConfig::validate`](crate::ClientConfig::validate). Out-of-range
    /// values are not rejected here: a negative or non-finite rate means the
    /// bucket never refills and a `bucket_size` of 0 is raised to 1.
    pub fn new(config: RateLimiterConfig) -> Self {
        if !(config.requests_per_second.is_finite() && config.requests_per_second > 0.0)
            || config.bucket_size == 0
        {
            tracing::warn!(
                requests_per_second = config.requests_per_second,
                bucket_size = config.bucket_size,
                "rate limiter config out of range, clamping"
            );
        }
        let bucket = TokenBucket::new(config.bucket_size, config.requests_per_second);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(LimiterState {
                    bucket,
                    queue: VecDeque::new(),
                    ticker: None,
                    closed: false,
                }),
            }),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.shared.config
    }

    /// Wait for one token.
    ///
    /// Returns immediately when a token is free and nobody is queued ahead.
    /// Fails only if the limiter is reset or destroyed while waiting, or was
    /// already destroyed.
    pub async fn acquire(&self) -> Result<(), AdmissionError> {
        let rx = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(AdmissionError::Closed);
            }
            state.bucket.refill();
            state.grant_waiters();
            if state.queue.is_empty() && state.bucket.try_take() {
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiter {
                tx,
                enqueued_at: Instant::now(),
            });
            tracing::debug!(
                queue_len = state.queue.len(),
                wait_ms = u64::try_from(state.bucket.wait_time().as_millis()).unwrap_or(u64::MAX),
                "rate limited, queueing request"
            );
            if state.ticker.is_none() {
                let period = self.shared.config.poll_interval();
                state.ticker = Some(tokio::spawn(run_ticker(
                    Arc::downgrade(&self.shared),
                    period,
                )));
            }
            rx
        };
        rx.await.unwrap_or(Err(AdmissionError::Reset))
    }

    /// Whole tokens available right now.
    pub fn available_tokens(&self) -> u32 {
        let mut state = self.shared.lock();
        state.bucket.refill();
        state.grant_waiters();
        state.bucket.available()
    }

    /// Number of callers waiting for a token.
    pub fn queue_len(&self) -> usize {
        let mut state = self.shared.lock();
        state.queue.retain(|w| !w.tx.is_closed());
        state.queue.len()
    }

    /// Fail every queued caller with [`AdmissionError::Reset`], stop the
    /// ticker and refill the bucket. The limiter stays usable.
    pub fn reset(&self) {
        let cancelled = self.shared.lock().cancel_waiters();
        tracing::info!(cancelled, "rate limiter reset");
    }

    /// Like [`reset`](Self::reset), then refuse all further admissions.
    pub fn destroy(&self) {
        let cancelled = {
            let mut state = self.shared.lock();
            state.closed = true;
            state.cancel_waiters()
        };
        tracing::info!(cancelled, "rate limiter destroyed");
    }

    /// Returns `true` once [`destroy`](Self::destroy) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("RateLimiter")
            .field("available", &state.bucket.available())
            .field("queued", &state.queue.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::poll;

    fn limiter(bucket_size: u32, requests_per_second: f64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            requests_per_second,
            bucket_size,
            poll_interval_ms: 100,
        })
    }

    fn ticker_running(rl: &RateLimiter) -> bool {
        rl.shared.lock().ticker.is_some()
    }

    async fn wait_for_queue(rl: &RateLimiter, len: usize) {
        while rl.queue_len() < len {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_admitted_then_third_waits_for_refill() {
        let rl = limiter(2, 2.0);
        let start = Instant::now();
        rl.acquire().await.unwrap();
        rl.acquire().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        rl.acquire().await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(500), "waited={waited:?}");
        assert!(waited <= Duration::from_millis(700), "waited={waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn queued_callers_granted_in_order() {
        let rl = limiter(1, 5.0);
        rl.acquire().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for id in 0..3 {
            let rl2 = rl.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                rl2.acquire().await.unwrap();
                order.lock().unwrap().push(id);
            }));
            wait_for_queue(&rl, id + 1).await;
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn newcomer_does_not_overtake_queued_caller() {
        let rl = RateLimiter::new(RateLimiterConfig {
            requests_per_second: 10.0,
            bucket_size: 1,
            poll_interval_ms: 1000,
        });
        rl.acquire().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let first = {
            let rl = rl.clone();
            let order = order.clone();
            tokio::spawn(async move {
                rl.acquire().await.unwrap();
                order.lock().unwrap().push("A");
            })
        };
        wait_for_queue(&rl, 1).await;

        // a token accrues long before the next tick
        time::advance(Duration::from_millis(150)).await;
        let second = {
            let rl = rl.clone();
            let order = order.clone();
            tokio::spawn(async move {
                rl.acquire().await.unwrap();
                order.lock().unwrap().push("B");
            })
        };

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_every_waiter() {
        let rl = limiter(1, 0.001);
        rl.acquire().await.unwrap();

        let mut handles = Vec::new();
        for n in 1..=3 {
            let rl2 = rl.clone();
            handles.push(tokio::spawn(async move { rl2.acquire().await }));
            wait_for_queue(&rl, n).await;
        }
        assert!(ticker_running(&rl));

        rl.reset();
        for h in handles {
            assert_eq!(h.await.unwrap(), Err(AdmissionError::Reset));
        }
        assert_eq!(rl.queue_len(), 0);
        assert!(!ticker_running(&rl));
        assert_eq!(rl.available_tokens(), 1);
        // still usable after a reset
        rl.acquire().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_is_terminal() {
        let rl = limiter(1, 0.001);
        rl.acquire().await.unwrap();
        let rl2 = rl.clone();
        let waiter = tokio::spawn(async move { rl2.acquire().await });
        wait_for_queue(&rl, 1).await;

        rl.destroy();
        assert_eq!(waiter.await.unwrap(), Err(AdmissionError::Reset));
        assert!(rl.is_closed());
        assert_eq!(rl.acquire().await, Err(AdmissionError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_stops_once_queue_drains() {
        let rl = limiter(1, 10.0);
        rl.acquire().await.unwrap();
        assert!(!ticker_running(&rl));

        rl.acquire().await.unwrap();
        // give the ticker a chance to observe the empty queue
        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(rl.queue_len(), 0);
        assert!(!ticker_running(&rl));
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_refill_lazily_up_to_capacity() {
        let rl = limiter(10, 10.0);
        for _ in 0..10 {
            rl.acquire().await.unwrap();
        }
        assert_eq!(rl.available_tokens(), 0);

        time::advance(Duration::from_millis(300)).await;
        assert_eq!(rl.available_tokens(), 3);

        time::advance(Duration::from_secs(10)).await;
        assert_eq!(rl.available_tokens(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_waiter_does_not_consume_a_token() {
        let rl = limiter(1, 0.001);
        rl.acquire().await.unwrap();

        let mut pending = Box::pin(rl.acquire());
        assert!(poll!(pending.as_mut()).is_pending());
        assert_eq!(rl.queue_len(), 1);
        drop(pending);
        assert_eq!(rl.queue_len(), 0);
    }

    #[test]
    fn wait_time_saturates_for_tiny_rates() {
        let mut bucket = TokenBucket::new(1, 1e-20);
        assert!(bucket.try_take());
        assert_eq!(bucket.wait_time(), Duration::MAX);
    }

    #[test]
    fn out_of_range_parameters_are_clamped() {
        let mut never = TokenBucket::new(1, -5.0);
        assert!(never.try_take());
        never.refill();
        assert_eq!(never.available(), 0);
        assert_eq!(never.wait_time(), Duration::MAX);

        let mut nan = TokenBucket::new(2, f64::NAN);
        nan.refill();
        assert_eq!(nan.available(), 2);

        let mut empty = TokenBucket::new(0, 10.0);
        assert_eq!(empty.available(), 1);
        assert!(empty.try_take());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_bucket_size_still_admits() {
        let rl = RateLimiter::new(RateLimiterConfig {
            requests_per_second: 10.0,
            bucket_size: 0,
            poll_interval_ms: 100,
        });
        rl.acquire().await.unwrap();
        rl.acquire().await.unwrap();
        assert_eq!(rl.queue_len(), 0);
    }

    #[test]
    fn wait_time_when_empty() {
        let mut bucket = TokenBucket::new(1, 10.0);
        assert_eq!(bucket.wait_time(), Duration::ZERO);
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
        let wait = bucket.wait_time();
        // ~100ms for one token at 10 tokens/sec
        assert!(
            wait.as_millis() >= 50 && wait.as_millis() <= 200,
            "unexpected wait time: {wait:?}"
        );
    }
}
