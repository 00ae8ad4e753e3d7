//! Token bucket admission control with a FIFO waiter queue
//!
//! Admits outbound requests at a sustained rate with burst capacity.
//! Contended callers queue in arrival order and are serviced by a fixed
//! tick task; a caller that waits past the admission timeout receives a
//! typed error instead of hanging. The limiter never performs network
//! I/O itself.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use crate::breaker::CircuitBreaker;
use crate::config::FeedConfig;
use crate::errors::{FeedError, FeedResult};
use crate::logger::{self, LogTag};

#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Sustained refill rate
    pub requests_per_second: f64,
    /// Token cap; also the immediate-admission burst size
    pub burst_capacity: f64,
    /// Bound on queued wait before AdmissionTimeout
    pub admission_timeout: Duration,
    /// Scheduler tick for servicing queued waiters
    pub tick_interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 0.5,
            burst_capacity: 5.0,
            admission_timeout: Duration::from_secs(60),
            tick_interval: Duration::from_millis(100),
        }
    }
}

impl LimiterConfig {
    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            requests_per_second: config.requests_per_second,
            burst_capacity: config.burst_capacity,
            admission_timeout: config.admission_timeout(),
            ..Default::default()
        }
    }
}

struct Waiter {
    id: u64,
    grant: oneshot::Sender<()>,
}

struct BucketInner {
    tokens: f64,
    last_refill: Instant,
    queue: VecDeque<Waiter>,
    next_waiter_id: u64,
}

impl BucketInner {
    /// Lazy refill: add elapsed * rate tokens, capped at burst capacity
    fn refill(&mut self, rate: f64, cap: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(cap);
        self.last_refill = now;
    }
}

pub struct TokenBucketLimiter {
    config: LimiterConfig,
    inner: Arc<Mutex<BucketInner>>,
    breaker: Option<Arc<CircuitBreaker>>,
    scheduler: tokio::task::JoinHandle<()>,
}

impl TokenBucketLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        let inner = Arc::new(Mutex::new(BucketInner {
            tokens: config.burst_capacity,
            last_refill: Instant::now(),
            queue: VecDeque::new(),
            next_waiter_id: 0,
        }));

        let scheduler = Self::spawn_scheduler(
            Arc::clone(&inner),
            config.requests_per_second,
            config.burst_capacity,
            config.tick_interval,
        );

        Self {
            config,
            inner,
            breaker: None,
            scheduler,
        }
    }

    /// Pair the limiter with a circuit breaker; acquisition then fails
    /// fast while the circuit forbids admission.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Wait for permission to issue one request
    ///
    /// Resolves when a token is consumed, fails with `CircuitOpen` if the
    /// paired breaker forbids admission, or with `AdmissionTimeout` if no
    /// token becomes available within the configured wait.
    pub async fn acquire(&self) -> FeedResult<()> {
        if let Some(breaker) = &self.breaker {
            if let Err(retry_in) = breaker.check_admission().await {
                return Err(FeedError::CircuitOpen {
                    retry_in_ms: retry_in.as_millis() as u64,
                });
            }
        }

        // Fast path: token available right now
        let (rx, waiter_id) = {
            let mut inner = self.inner.lock();
            inner.refill(self.config.requests_per_second, self.config.burst_capacity);

            if inner.tokens >= 1.0 {
                inner.tokens -= 1.0;
                return Ok(());
            }

            // Queue in arrival order; the scheduler grants FIFO
            let (tx, rx) = oneshot::channel();
            let id = inner.next_waiter_id;
            inner.next_waiter_id += 1;
            inner.queue.push_back(Waiter { id, grant: tx });
            (rx, id)
        };

        // Guard removes the queue slot if this future is dropped or the
        // wait times out, so a cancelled caller never leaks its slot.
        let guard = WaiterGuard {
            inner: Arc::clone(&self.inner),
            id: waiter_id,
            armed: true,
        };

        match tokio::time::timeout(self.config.admission_timeout, rx).await {
            Ok(Ok(())) => {
                guard.disarm();
                Ok(())
            }
            Ok(Err(_)) => {
                // Limiter dropped while we waited
                guard.disarm();
                Err(FeedError::AdmissionTimeout {
                    waited_ms: self.config.admission_timeout.as_millis() as u64,
                })
            }
            Err(_) => {
                drop(guard); // removes the queue entry
                logger::debug(
                    LogTag::Limiter,
                    &format!(
                        "admission timed out after {} ms",
                        self.config.admission_timeout.as_millis()
                    ),
                );
                Err(FeedError::AdmissionTimeout {
                    waited_ms: self.config.admission_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Non-blocking admission check
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.refill(self.config.requests_per_second, self.config.burst_capacity);
        if inner.tokens >= 1.0 && inner.queue.is_empty() {
            inner.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Number of callers currently queued for admission
    pub fn queue_depth(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Tokens currently available (diagnostic)
    pub fn tokens_available(&self) -> f64 {
        let mut inner = self.inner.lock();
        inner.refill(self.config.requests_per_second, self.config.burst_capacity);
        inner.tokens
    }

    fn spawn_scheduler(
        inner: Arc<Mutex<BucketInner>>,
        rate: f64,
        cap: f64,
        tick: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let mut inner = inner.lock();
                inner.refill(rate, cap);

                // Service queued waiters in FIFO order while tokens last
                while inner.tokens >= 1.0 {
                    let Some(waiter) = inner.queue.pop_front() else {
                        break;
                    };
                    inner.tokens -= 1.0;
                    if waiter.grant.send(()).is_err() {
                        // Waiter gave up between queueing and grant;
                        // return the unconsumed token
                        inner.tokens += 1.0;
                    }
                }
            }
        })
    }
}

impl Drop for TokenBucketLimiter {
    fn drop(&mut self) {
        self.scheduler.abort();
    }
}

/// Removes a queued waiter slot unless disarmed after a grant
struct WaiterGuard {
    inner: Arc<Mutex<BucketInner>>,
    id: u64,
    armed: bool,
}

impl WaiterGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.inner.lock();
            inner.queue.retain(|w| w.id != self.id);
        }
    }
}
