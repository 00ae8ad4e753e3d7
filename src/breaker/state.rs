//! Circuit breaker state machine
//!
//! Observes upstream request outcomes and transitions between
//! closed -> open -> half-open -> closed, blocking admission while open.
//! Rate limit responses never count as failures: they are expected,
//! handled by the limiter's backoff, and would otherwise trip the
//! breaker during normal operation.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::errors::FeedError;
use crate::logger::{self, LogTag};

use super::config::CircuitBreakerConfig;

/// Circuit phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitPhase::Closed => "closed",
            CircuitPhase::Open => "open",
            CircuitPhase::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub struct CircuitBreaker {
    /// Upstream target this breaker guards
    target: String,

    phase: RwLock<CircuitPhase>,

    config: CircuitBreakerConfig,

    /// Consecutive failure count (decremented by successes while closed)
    failures: AtomicU32,

    /// Consecutive success count in half-open
    successes: AtomicU32,

    /// Probe requests admitted in half-open
    half_open_calls: AtomicU32,

    /// When the circuit was opened
    opened_at: RwLock<Option<Instant>>,

    /// Timestamped outcomes within the monitoring window (true = failure)
    window: Mutex<VecDeque<(Instant, bool)>>,

    /// Total times the circuit has opened
    total_opens: AtomicU64,

    /// Last error that caused a failure
    last_error: RwLock<Option<String>>,
}

impl CircuitBreaker {
    pub fn new(target: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            target: target.to_string(),
            phase: RwLock::new(CircuitPhase::Closed),
            config,
            failures: AtomicU32::new(0),
            successes: AtomicU32::new(0),
            half_open_calls: AtomicU32::new(0),
            opened_at: RwLock::new(None),
            window: Mutex::new(VecDeque::new()),
            total_opens: AtomicU64::new(0),
            last_error: RwLock::new(None),
        }
    }

    pub fn with_defaults(target: &str) -> Self {
        Self::new(target, CircuitBreakerConfig::default())
    }

    /// Check if the circuit admits a request
    ///
    /// Returns Ok(()) if admitted, Err(time until retry) if blocked.
    pub async fn check_admission(&self) -> Result<(), Duration> {
        let phase = *self.phase.read().await;

        match phase {
            CircuitPhase::Closed => Ok(()),

            CircuitPhase::HalfOpen => {
                // Bounded number of probe requests
                let current = self.half_open_calls.fetch_add(1, Ordering::SeqCst);
                if current < self.config.half_open_max_calls {
                    Ok(())
                } else {
                    self.half_open_calls.fetch_sub(1, Ordering::SeqCst);
                    Err(Duration::from_millis(100))
                }
            }

            CircuitPhase::Open => {
                let opened_at = *self.opened_at.read().await;
                match opened_at {
                    Some(time) => {
                        let elapsed = time.elapsed();
                        if elapsed >= self.config.reset_timeout {
                            // Cooldown over, the next check goes through
                            // as the first half-open probe
                            self.transition_to_half_open().await;
                            self.half_open_calls.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        } else {
                            Err(self.config.reset_timeout - elapsed)
                        }
                    }
                    None => Ok(()),
                }
            }
        }
    }

    /// Record a successful request outcome
    pub async fn record_success(&self) {
        self.push_outcome(false);

        let mut phase = self.phase.write().await;

        match *phase {
            CircuitPhase::Closed => {
                // Isolated failures amid successes should not accumulate
                let _ = self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                        Some(f.saturating_sub(1))
                    });
            }

            CircuitPhase::HalfOpen => {
                let successes = self.successes.fetch_add(1, Ordering::SeqCst) + 1;

                if successes >= self.config.success_threshold {
                    // Recovery confirmed
                    *phase = CircuitPhase::Closed;
                    self.failures.store(0, Ordering::SeqCst);
                    self.successes.store(0, Ordering::SeqCst);
                    self.half_open_calls.store(0, Ordering::SeqCst);
                    *self.opened_at.write().await = None;
                    *self.last_error.write().await = None;
                    logger::info(
                        LogTag::Breaker,
                        &format!("{}: circuit closed after recovery", self.target),
                    );
                }
            }

            CircuitPhase::Open => {
                // Stale success from before the trip; nothing to do
            }
        }
    }

    /// Record a failed request outcome
    ///
    /// Errors that do not indicate upstream ill health (rate limits,
    /// caller errors) are ignored entirely.
    pub async fn record_failure(&self, error: &FeedError) {
        if !error.counts_toward_breaker() {
            return;
        }

        self.push_outcome(true);
        *self.last_error.write().await = Some(error.to_string());

        let mut phase = self.phase.write().await;

        match *phase {
            CircuitPhase::Closed => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;

                if failures >= self.config.failure_threshold || self.window_rate_exceeded() {
                    *phase = CircuitPhase::Open;
                    *self.opened_at.write().await = Some(Instant::now());
                    self.total_opens.fetch_add(1, Ordering::SeqCst);
                    logger::warning(
                        LogTag::Breaker,
                        &format!(
                            "{}: circuit opened after {} consecutive failures",
                            self.target, failures
                        ),
                    );
                }
            }

            CircuitPhase::HalfOpen => {
                // Probe failed, reopen with a fresh cooldown
                *phase = CircuitPhase::Open;
                *self.opened_at.write().await = Some(Instant::now());
                self.successes.store(0, Ordering::SeqCst);
                self.half_open_calls.store(0, Ordering::SeqCst);
                self.total_opens.fetch_add(1, Ordering::SeqCst);
                logger::warning(
                    LogTag::Breaker,
                    &format!("{}: probe failed, circuit reopened", self.target),
                );
            }

            CircuitPhase::Open => {
                // Already open; extend the cooldown
                *self.opened_at.write().await = Some(Instant::now());
            }
        }
    }

    /// Force the circuit open (administrative override, e.g. draining)
    pub async fn force_open(&self, reason: &str) {
        let mut phase = self.phase.write().await;
        *phase = CircuitPhase::Open;
        *self.opened_at.write().await = Some(Instant::now());
        *self.last_error.write().await = Some(reason.to_string());
        self.total_opens.fetch_add(1, Ordering::SeqCst);
    }

    /// Force the circuit closed with all counters zeroed
    pub async fn reset(&self) {
        let mut phase = self.phase.write().await;
        *phase = CircuitPhase::Closed;
        self.failures.store(0, Ordering::SeqCst);
        self.successes.store(0, Ordering::SeqCst);
        self.half_open_calls.store(0, Ordering::SeqCst);
        *self.opened_at.write().await = None;
        *self.last_error.write().await = None;
        self.window.lock().clear();
    }

    pub async fn current_phase(&self) -> CircuitPhase {
        *self.phase.read().await
    }

    /// Time until the open circuit admits a probe, if open
    pub async fn time_until_retry(&self) -> Option<Duration> {
        let phase = *self.phase.read().await;
        if phase != CircuitPhase::Open {
            return None;
        }
        let opened_at = *self.opened_at.read().await;
        opened_at.map(|t| {
            let elapsed = t.elapsed();
            if elapsed < self.config.reset_timeout {
                self.config.reset_timeout - elapsed
            } else {
                Duration::ZERO
            }
        })
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            target: self.target.clone(),
            phase: *self.phase.read().await,
            consecutive_failures: self.failures.load(Ordering::SeqCst),
            half_open_successes: self.successes.load(Ordering::SeqCst),
            total_opens: self.total_opens.load(Ordering::SeqCst),
            rolling_failure_rate: self.window_failure_rate(),
            last_error: self.last_error.read().await.clone(),
            time_until_retry: self.time_until_retry().await,
        }
    }

    // ==================== Private Methods ====================

    async fn transition_to_half_open(&self) {
        let mut phase = self.phase.write().await;
        if *phase == CircuitPhase::Open {
            *phase = CircuitPhase::HalfOpen;
            self.successes.store(0, Ordering::SeqCst);
            self.half_open_calls.store(0, Ordering::SeqCst);
            logger::info(
                LogTag::Breaker,
                &format!("{}: circuit half-open, probing recovery", self.target),
            );
        }
    }

    fn push_outcome(&self, failed: bool) {
        let now = Instant::now();
        let mut window = self.window.lock();
        window.push_back((now, failed));
        Self::prune_window(&mut window, now, self.config.monitoring_window);
    }

    fn prune_window(window: &mut VecDeque<(Instant, bool)>, now: Instant, span: Duration) {
        while let Some(&(t, _)) = window.front() {
            if now.duration_since(t) > span {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    fn window_failure_rate(&self) -> f64 {
        let mut window = self.window.lock();
        let now = Instant::now();
        Self::prune_window(&mut window, now, self.config.monitoring_window);

        if window.is_empty() {
            return 0.0;
        }
        let failures = window.iter().filter(|(_, failed)| *failed).count();
        failures as f64 / window.len() as f64
    }

    fn window_rate_exceeded(&self) -> bool {
        let mut window = self.window.lock();
        let now = Instant::now();
        Self::prune_window(&mut window, now, self.config.monitoring_window);

        if window.len() < self.config.min_window_requests {
            return false;
        }
        let failures = window.iter().filter(|(_, failed)| *failed).count();
        (failures as f64) / (window.len() as f64) > self.config.failure_rate_threshold
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("target", &self.target)
            .field("failures", &self.failures.load(Ordering::SeqCst))
            .field("successes", &self.successes.load(Ordering::SeqCst))
            .field("total_opens", &self.total_opens.load(Ordering::SeqCst))
            .finish()
    }
}

/// Read-only snapshot of breaker state
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub target: String,
    pub phase: CircuitPhase,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub total_opens: u64,
    pub rolling_failure_rate: f64,
    pub last_error: Option<String>,
    pub time_until_retry: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error() -> FeedError {
        FeedError::ServerError {
            status: 500,
            message: "internal".to_string(),
        }
    }

    fn rate_limit() -> FeedError {
        FeedError::RateLimited {
            retry_after_ms: None,
        }
    }

    fn fast_config(failure_threshold: u32, success_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            success_threshold,
            reset_timeout: Duration::from_millis(20),
            half_open_max_calls: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn starts_closed_and_admits() {
        let breaker = CircuitBreaker::with_defaults("upstream");
        assert!(breaker.check_admission().await.is_ok());
        assert_eq!(breaker.current_phase().await, CircuitPhase::Closed);
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new("upstream", fast_config(5, 2));

        for _ in 0..5 {
            breaker.record_failure(&server_error()).await;
        }

        assert_eq!(breaker.current_phase().await, CircuitPhase::Open);
        assert!(breaker.check_admission().await.is_err());
    }

    #[tokio::test]
    async fn interleaved_success_prevents_trip() {
        let breaker = CircuitBreaker::new("upstream", fast_config(5, 2));

        for _ in 0..4 {
            breaker.record_failure(&server_error()).await;
        }
        breaker.record_success().await;
        breaker.record_failure(&server_error()).await;

        // The success decremented the count, so the 5th failure is only
        // the 4th consecutive one
        assert_eq!(breaker.current_phase().await, CircuitPhase::Closed);
    }

    #[tokio::test]
    async fn rate_limits_never_trip_the_breaker() {
        let breaker = CircuitBreaker::new("upstream", fast_config(2, 2));

        for _ in 0..20 {
            breaker.record_failure(&rate_limit()).await;
        }

        assert_eq!(breaker.current_phase().await, CircuitPhase::Closed);
    }

    #[tokio::test]
    async fn recovers_through_half_open() {
        let breaker = CircuitBreaker::new("upstream", fast_config(2, 2));

        breaker.record_failure(&server_error()).await;
        breaker.record_failure(&server_error()).await;
        assert_eq!(breaker.current_phase().await, CircuitPhase::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(breaker.check_admission().await.is_ok());
        assert_eq!(breaker.current_phase().await, CircuitPhase::HalfOpen);

        breaker.record_success().await;
        breaker.record_success().await;

        assert_eq!(breaker.current_phase().await, CircuitPhase::Closed);
        let stats = breaker.stats().await;
        assert_eq!(stats.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn single_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("upstream", fast_config(2, 2));

        breaker.record_failure(&server_error()).await;
        breaker.record_failure(&server_error()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(breaker.check_admission().await.is_ok());
        assert_eq!(breaker.current_phase().await, CircuitPhase::HalfOpen);

        breaker.record_failure(&server_error()).await;
        assert_eq!(breaker.current_phase().await, CircuitPhase::Open);

        // Fresh cooldown applies
        assert!(breaker.check_admission().await.is_err());
    }

    #[tokio::test]
    async fn half_open_caps_probe_count() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            half_open_max_calls: 2,
            reset_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("upstream", config);

        breaker.record_failure(&server_error()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(breaker.check_admission().await.is_ok()); // probe 1
        assert!(breaker.check_admission().await.is_ok()); // probe 2
        assert!(breaker.check_admission().await.is_err()); // capped
    }

    #[tokio::test]
    async fn rolling_failure_rate_trips_before_consecutive_threshold() {
        let config = CircuitBreakerConfig {
            failure_threshold: 100, // unreachable via consecutive count
            min_window_requests: 10,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("upstream", config);

        // 7 failures, 5 successes interleaved: rate 7/12 > 0.5, but the
        // successes keep the consecutive count near zero
        for _ in 0..5 {
            breaker.record_failure(&server_error()).await;
            breaker.record_success().await;
        }
        breaker.record_failure(&server_error()).await;
        breaker.record_failure(&server_error()).await;

        assert_eq!(breaker.current_phase().await, CircuitPhase::Open);
    }

    #[tokio::test]
    async fn reset_zeroes_everything() {
        let breaker = CircuitBreaker::new("upstream", fast_config(1, 1));
        breaker.record_failure(&server_error()).await;
        assert_eq!(breaker.current_phase().await, CircuitPhase::Open);

        breaker.reset().await;
        assert_eq!(breaker.current_phase().await, CircuitPhase::Closed);
        let stats = breaker.stats().await;
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.rolling_failure_rate, 0.0);
    }
}
