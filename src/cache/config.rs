/// Cache TTL policy per data class
///
/// One cache instance serves heterogeneous data with very different
/// volatility: token metadata stays valid for an hour while price ticks
/// go stale in seconds. Keys are classified by prefix so call sites
/// don't carry per-call TTL bookkeeping.
use crate::config::FeedConfig;
use crate::ohlcv::types::Timeframe;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Prefix classes checked in order; first match wins
    classes: Vec<(String, Duration)>,
    default_ttl: Duration,
    pub max_entries: usize,
    pub sweep_interval: Duration,
}

impl CachePolicy {
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            classes: Vec::new(),
            default_ttl,
            max_entries,
            sweep_interval: Duration::from_secs(30),
        }
    }

    /// Policy derived from the pipeline configuration
    pub fn from_config(config: &FeedConfig) -> Self {
        let mut policy = Self {
            classes: Vec::new(),
            default_ttl: Duration::from_millis(config.cache_default_ttl_ms),
            max_entries: config.cache_max_entries,
            sweep_interval: Duration::from_millis(config.cache_sweep_interval_ms),
        };

        policy.add_class("meta:", Duration::from_millis(config.meta_ttl_ms));
        policy.add_class("price:", Duration::from_millis(config.price_ttl_ms));
        for tf in Timeframe::all() {
            policy.add_class(&format!("chart:{}:", tf.as_str()), Self::chart_ttl(tf));
        }

        policy
    }

    /// TTL for cached chart data, shorter for faster-moving timeframes
    pub fn chart_ttl(timeframe: Timeframe) -> Duration {
        match timeframe {
            Timeframe::Minute1 => Duration::from_secs(30),
            Timeframe::Minute5 => Duration::from_secs(60),
            Timeframe::Minute15 => Duration::from_secs(180),
            Timeframe::Hour1 => Duration::from_secs(600),
            Timeframe::Hour4 => Duration::from_secs(1800),
        }
    }

    pub fn add_class(&mut self, prefix: &str, ttl: Duration) {
        self.classes.push((prefix.to_string(), ttl));
    }

    /// Resolve the TTL for a key by prefix class, falling back to default
    pub fn resolve_ttl(&self, key: &str) -> Duration {
        for (prefix, ttl) in &self.classes {
            if key.starts_with(prefix.as_str()) {
                return *ttl;
            }
        }
        self.default_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_classes_resolve_in_order() {
        let mut policy = CachePolicy::new(Duration::from_secs(60), 100);
        policy.add_class("meta:", Duration::from_secs(3600));
        policy.add_class("price:", Duration::from_secs(30));

        assert_eq!(policy.resolve_ttl("meta:SOL"), Duration::from_secs(3600));
        assert_eq!(policy.resolve_ttl("price:SOL"), Duration::from_secs(30));
        assert_eq!(policy.resolve_ttl("other:SOL"), Duration::from_secs(60));
    }

    #[test]
    fn chart_ttls_grow_with_timeframe() {
        let mut last = Duration::ZERO;
        for tf in Timeframe::all() {
            let ttl = CachePolicy::chart_ttl(tf);
            assert!(ttl > last, "chart TTL must grow with bucket width");
            last = ttl;
        }
    }

    #[test]
    fn config_derived_policy_covers_chart_keys() {
        let policy = CachePolicy::from_config(&FeedConfig::default());
        assert_eq!(
            policy.resolve_ttl("chart:5m:So11111111111111111111111111111111111111112"),
            CachePolicy::chart_ttl(Timeframe::Minute5)
        );
        assert_eq!(policy.resolve_ttl("meta:abc"), Duration::from_secs(3600));
    }
}
