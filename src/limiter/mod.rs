// Outbound request admission: token bucket plus retry backoff

pub mod backoff;
pub mod token_bucket;

pub use backoff::backoff_delay;
pub use token_bucket::{LimiterConfig, TokenBucketLimiter};
