/// Circuit breaker configuration
use crate::config::FeedConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,

    /// Cooldown before an open circuit admits a probe
    pub reset_timeout: Duration,

    /// Trial requests admitted while half-open
    pub half_open_max_calls: u32,

    /// Rolling window for failure-rate monitoring
    pub monitoring_window: Duration,

    /// Minimum observations in the window before the rate can trip
    pub min_window_requests: usize,

    /// Failure rate over the window that trips the circuit
    pub failure_rate_threshold: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
            monitoring_window: Duration::from_secs(60),
            min_window_requests: 10,
            failure_rate_threshold: 0.5,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            failure_threshold: config.circuit_failure_threshold,
            success_threshold: config.circuit_success_threshold,
            reset_timeout: Duration::from_millis(config.circuit_reset_timeout_ms),
            half_open_max_calls: config.circuit_half_open_max_calls,
            monitoring_window: Duration::from_millis(config.circuit_window_ms),
            ..Default::default()
        }
    }
}
