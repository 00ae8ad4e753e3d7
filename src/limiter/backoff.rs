//! Retry backoff computation with jitter
//!
//! Rate limit responses back off harder (longer cap, wider jitter) than
//! other retryable failures. Jitter desynchronizes callers that would
//! otherwise retry in lockstep after a shared outage.

use rand::Rng;
use std::time::Duration;

use crate::errors::FeedError;

/// Cap for rate-limit backoff
const RATE_LIMIT_MAX_DELAY: Duration = Duration::from_secs(300);
/// Floor for rate-limit backoff
const RATE_LIMIT_MIN_DELAY: Duration = Duration::from_secs(2);
/// Cap for other retryable errors
const RETRY_MAX_DELAY: Duration = Duration::from_secs(120);
/// Floor for other retryable errors
const RETRY_MIN_DELAY: Duration = Duration::from_secs(1);
/// Exponent cap for non-rate-limit errors
const RETRY_MAX_EXPONENT: u32 = 6;

/// Compute the delay before retry attempt `attempt` (0-based)
///
/// Rate-limit errors honor a provider-suggested delay when present and
/// double from there, capped at 5 minutes with ±30% jitter, floored at
/// 2s. Other retryable errors double the base delay, capped at 2
/// minutes with ±20% jitter, floored at 1s.
pub fn backoff_delay(error: &FeedError, attempt: u32, base_delay: Duration) -> Duration {
    if error.is_rate_limit() {
        let suggested = error
            .suggested_retry_after_ms()
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO);
        let base = suggested.max(base_delay);
        let raw = base.saturating_mul(2u32.saturating_pow(attempt.min(10)));
        let capped = raw.min(RATE_LIMIT_MAX_DELAY);
        apply_jitter(capped, 0.3).max(RATE_LIMIT_MIN_DELAY)
    } else {
        let raw = base_delay.saturating_mul(2u32.saturating_pow(attempt.min(RETRY_MAX_EXPONENT)));
        let capped = raw.min(RETRY_MAX_DELAY);
        apply_jitter(capped, 0.2).max(RETRY_MIN_DELAY)
    }
}

/// Symmetric jitter: delay * (1 ± fraction)
fn apply_jitter(delay: Duration, fraction: f64) -> Duration {
    let millis = delay.as_millis() as f64;
    let factor = rand::thread_rng().gen_range(-fraction..=fraction);
    Duration::from_millis((millis * (1.0 + factor)).max(0.0) as u64)
}
