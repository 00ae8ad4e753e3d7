/// Pipeline configuration
///
/// Defaults are tuned for a strict public data provider (30 req/min class).
/// Values can be loaded from a TOML file and individually overridden via
/// `CANDLEFEED_*` environment variables.
use crate::errors::{FeedError, FeedResult};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Base URL of the upstream candle provider
    pub base_url: String,

    /// Sustained admission rate for outbound requests
    pub requests_per_second: f64,

    /// Burst capacity of the token bucket
    pub burst_capacity: f64,

    /// Per-request HTTP timeout
    pub request_timeout_ms: u64,

    /// Maximum wait for limiter admission before AdmissionTimeout
    pub admission_timeout_ms: u64,

    /// Retry attempts for the fetch ladder
    pub max_retries: u32,

    /// Base delay for retry backoff
    pub retry_base_delay_ms: u64,

    /// Consecutive failures before the circuit opens
    pub circuit_failure_threshold: u32,

    /// Consecutive half-open successes needed to close the circuit
    pub circuit_success_threshold: u32,

    /// Cooldown before an open circuit allows a probe
    pub circuit_reset_timeout_ms: u64,

    /// Trial requests admitted while half-open
    pub circuit_half_open_max_calls: u32,

    /// Rolling window for failure rate monitoring
    pub circuit_window_ms: u64,

    /// Hard entry cap for the response cache
    pub cache_max_entries: usize,

    /// Fallback TTL for keys with no matching class
    pub cache_default_ttl_ms: u64,

    /// TTL for token metadata entries (`meta:` keys)
    pub meta_ttl_ms: u64,

    /// TTL for price tick entries (`price:` keys)
    pub price_ttl_ms: u64,

    /// Interval of the background expiry sweep
    pub cache_sweep_interval_ms: u64,

    /// Delay inserted between sibling upstream fetches
    pub stagger_delay_ms: u64,

    /// Minimum candle count before the retry ladder engages
    pub min_points: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://public-api.birdeye.so/defi".to_string(),
            requests_per_second: 0.5,
            burst_capacity: 5.0,
            request_timeout_ms: 10_000,
            admission_timeout_ms: 60_000,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            circuit_failure_threshold: 5,
            circuit_success_threshold: 3,
            circuit_reset_timeout_ms: 30_000,
            circuit_half_open_max_calls: 3,
            circuit_window_ms: 60_000,
            cache_max_entries: 2_000,
            cache_default_ttl_ms: 60_000,
            meta_ttl_ms: 3_600_000,
            price_ttl_ms: 30_000,
            cache_sweep_interval_ms: 30_000,
            stagger_delay_ms: 250,
            min_points: 20,
        }
    }
}

impl FeedConfig {
    /// Load configuration from a TOML file, then apply env overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> FeedResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| FeedError::Config(format!("failed to read config file: {}", e)))?;
        let mut config: FeedConfig = toml::from_str(&raw)
            .map_err(|e| FeedError::Config(format!("failed to parse config file: {}", e)))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus env overrides, validated
    pub fn from_env() -> FeedResult<Self> {
        let mut config = FeedConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CANDLEFEED_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_REQUESTS_PER_SECOND") {
            self.requests_per_second = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_BURST_CAPACITY") {
            self.burst_capacity = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_ADMISSION_TIMEOUT_MS") {
            self.admission_timeout_ms = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_RETRY_BASE_DELAY_MS") {
            self.retry_base_delay_ms = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_CIRCUIT_FAILURE_THRESHOLD") {
            self.circuit_failure_threshold = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_CIRCUIT_SUCCESS_THRESHOLD") {
            self.circuit_success_threshold = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_CIRCUIT_RESET_TIMEOUT_MS") {
            self.circuit_reset_timeout_ms = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_CIRCUIT_HALF_OPEN_MAX_CALLS") {
            self.circuit_half_open_max_calls = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_CIRCUIT_WINDOW_MS") {
            self.circuit_window_ms = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_CACHE_MAX_ENTRIES") {
            self.cache_max_entries = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_CACHE_DEFAULT_TTL_MS") {
            self.cache_default_ttl_ms = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_META_TTL_MS") {
            self.meta_ttl_ms = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_PRICE_TTL_MS") {
            self.price_ttl_ms = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_CACHE_SWEEP_INTERVAL_MS") {
            self.cache_sweep_interval_ms = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_STAGGER_DELAY_MS") {
            self.stagger_delay_ms = v;
        }
        if let Some(v) = env_parse("CANDLEFEED_MIN_POINTS") {
            self.min_points = v;
        }
    }

    pub fn validate(&self) -> FeedResult<()> {
        if self.requests_per_second <= 0.0 {
            return Err(FeedError::Config(
                "requests_per_second must be positive".to_string(),
            ));
        }
        if self.burst_capacity < 1.0 {
            return Err(FeedError::Config(
                "burst_capacity must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(FeedError::Config(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.cache_max_entries == 0 {
            return Err(FeedError::Config(
                "cache_max_entries must be greater than zero".to_string(),
            ));
        }
        if self.circuit_failure_threshold == 0 || self.circuit_success_threshold == 0 {
            return Err(FeedError::Config(
                "circuit thresholds must be greater than zero".to_string(),
            ));
        }
        // Half-open must admit at least as many probes as the successes
        // needed to close, otherwise the circuit can never recover
        if self.circuit_success_threshold > self.circuit_half_open_max_calls {
            return Err(FeedError::Config(format!(
                "circuit_success_threshold ({}) exceeds circuit_half_open_max_calls ({}), the circuit could never close",
                self.circuit_success_threshold, self.circuit_half_open_max_calls
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    pub fn stagger_delay(&self) -> Duration {
        Duration::from_millis(self.stagger_delay_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(FeedConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_rate() {
        let mut config = FeedConfig::default();
        config.requests_per_second = 0.0;
        assert!(matches!(config.validate(), Err(FeedError::Config(_))));
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut config = FeedConfig::default();
        config.request_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unreachable_half_open_recovery() {
        let mut config = FeedConfig::default();
        config.circuit_success_threshold = 5;
        config.circuit_half_open_max_calls = 3;
        assert!(matches!(config.validate(), Err(FeedError::Config(_))));

        // Equal is fine: every probe may be a success
        config.circuit_half_open_max_calls = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_cover_circuit_and_cache_fields() {
        std::env::set_var("CANDLEFEED_RETRY_BASE_DELAY_MS", "42");
        std::env::set_var("CANDLEFEED_CIRCUIT_FAILURE_THRESHOLD", "9");
        std::env::set_var("CANDLEFEED_CIRCUIT_WINDOW_MS", "12000");
        std::env::set_var("CANDLEFEED_META_TTL_MS", "7000");
        std::env::set_var("CANDLEFEED_CACHE_SWEEP_INTERVAL_MS", "5000");

        let mut config = FeedConfig::default();
        config.apply_env_overrides();

        std::env::remove_var("CANDLEFEED_RETRY_BASE_DELAY_MS");
        std::env::remove_var("CANDLEFEED_CIRCUIT_FAILURE_THRESHOLD");
        std::env::remove_var("CANDLEFEED_CIRCUIT_WINDOW_MS");
        std::env::remove_var("CANDLEFEED_META_TTL_MS");
        std::env::remove_var("CANDLEFEED_CACHE_SWEEP_INTERVAL_MS");

        assert_eq!(config.retry_base_delay_ms, 42);
        assert_eq!(config.circuit_failure_threshold, 9);
        assert_eq!(config.circuit_window_ms, 12_000);
        assert_eq!(config.meta_ttl_ms, 7_000);
        assert_eq!(config.cache_sweep_interval_ms, 5_000);
    }

    #[test]
    fn parses_toml() {
        let raw = r#"
            requests_per_second = 2.0
            burst_capacity = 10.0
            min_points = 50
        "#;
        let config: FeedConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.requests_per_second, 2.0);
        assert_eq!(config.min_points, 50);
        // Unspecified fields fall back to defaults
        assert_eq!(config.max_retries, 3);
    }
}
