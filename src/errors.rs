//! Error taxonomy for the candle pipeline
//!
//! Every variant carries enough context to decide, at the call site,
//! whether to retry, how long to wait, and whether the failure says
//! anything about upstream health. Rate limits are deliberately kept
//! out of the breaker's failure accounting: they are expected under a
//! strict quota and signal our own pacing, not upstream trouble.

use thiserror::Error;

pub type FeedResult<T> = Result<T, FeedError>;

#[derive(Error, Debug)]
pub enum FeedError {
    /// Limiter admission wait exceeded the configured bound
    #[error("admission timed out after {waited_ms} ms")]
    AdmissionTimeout { waited_ms: u64 },

    /// Circuit breaker is open; no request was attempted
    #[error("circuit open, retry in {retry_in_ms} ms")]
    CircuitOpen { retry_in_ms: u64 },

    /// Upstream returned 429
    #[error("rate limited by upstream{}", retry_after_ms.map(|ms| format!(", retry after {} ms", ms)).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    /// Upstream 5xx
    #[error("upstream server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Upstream 4xx other than 429
    #[error("upstream client error {status}: {message}")]
    ClientError { status: u16, message: String },

    /// Transport failure: timeout, connect error, broken transfer
    #[error("network error: {0}")]
    Network(String),

    /// Fewer candles than the caller's minimum across every fallback
    #[error("insufficient data: wanted at least {wanted} candles, got {got}")]
    InsufficientData { wanted: usize, got: usize },

    #[error("aggregation error: {0}")]
    Aggregation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("response parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl FeedError {
    /// Whether a retry of the same request could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::RateLimited { .. }
                | FeedError::ServerError { .. }
                | FeedError::Network(_)
                | FeedError::AdmissionTimeout { .. }
        )
    }

    /// Whether this failure reflects upstream ill health
    ///
    /// Rate limits and caller errors never count: tripping the breaker
    /// on a 429 would turn normal quota pressure into a full outage.
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(
            self,
            FeedError::ServerError { .. } | FeedError::Network(_)
        )
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, FeedError::RateLimited { .. })
    }

    /// Upstream-suggested wait before retrying, if one was provided
    pub fn suggested_retry_after_ms(&self) -> Option<u64> {
        match self {
            FeedError::RateLimited { retry_after_ms } => *retry_after_ms,
            FeedError::CircuitOpen { retry_in_ms } => Some(*retry_in_ms),
            _ => None,
        }
    }
}
