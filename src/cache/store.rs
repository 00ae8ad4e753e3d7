/// Generic in-memory response cache with TTL and LRU eviction
///
/// Thread-safe and generic over the value type. TTLs come from the
/// per-class policy unless supplied explicitly on insert. A background
/// sweep removes already-expired entries so keys that are never re-read
/// don't pin memory. Tracks metrics for monitoring.
use super::config::CachePolicy;
use crate::logger::{self, LogTag};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cache entry with its own expiry
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

/// Cache metrics for monitoring
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub inserts: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct ResponseCache<V>
where
    V: Clone,
{
    policy: CachePolicy,
    data: RwLock<HashMap<String, CacheEntry<V>>>,
    access_order: RwLock<VecDeque<String>>, // LRU tracking
    stats: RwLock<CacheStats>,
}

impl<V> ResponseCache<V>
where
    V: Clone,
{
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            data: RwLock::new(HashMap::new()),
            access_order: RwLock::new(VecDeque::new()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Get a value; expired entries behave as misses and are evicted
    pub fn get(&self, key: &str) -> Option<V> {
        let mut data = self.data.write();

        let state = data
            .get(key)
            .map(|entry| (entry.is_expired(), entry.value.clone()));

        match state {
            Some((true, _)) => {
                data.remove(key);
                drop(data);
                self.remove_from_access_order(key);

                let mut stats = self.stats.write();
                stats.misses += 1;
                stats.expirations += 1;
                None
            }
            Some((false, value)) => {
                drop(data);
                self.touch(key);
                self.stats.write().hits += 1;
                Some(value)
            }
            None => {
                drop(data);
                self.stats.write().misses += 1;
                None
            }
        }
    }

    /// Insert a value; TTL resolved from the key class unless given
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.policy.resolve_ttl(key));
        let mut data = self.data.write();

        // Evict the least-recently-touched entry if a new key would
        // push us over capacity
        if data.len() >= self.policy.max_entries && !data.contains_key(key) {
            self.evict_lru(&mut data);
        }

        data.insert(key.to_string(), CacheEntry::new(value, ttl));
        self.touch(key);
        self.stats.write().inserts += 1;
    }

    /// Whether a live (non-expired) entry exists for the key
    pub fn has(&self, key: &str) -> bool {
        let data = self.data.read();
        data.get(key).map(|e| !e.is_expired()).unwrap_or(false)
    }

    pub fn delete(&self, key: &str) -> bool {
        let removed = self.data.write().remove(key).is_some();
        if removed {
            self.remove_from_access_order(key);
        }
        removed
    }

    /// Remove all entries whose key contains the pattern
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut data = self.data.write();
        let keys: Vec<String> = data
            .keys()
            .filter(|k| k.contains(pattern))
            .cloned()
            .collect();

        for key in &keys {
            data.remove(key);
            self.remove_from_access_order(key);
        }

        keys.len()
    }

    /// Remove already-expired entries regardless of access patterns
    pub fn sweep(&self) -> usize {
        let mut data = self.data.write();
        let expired: Vec<String> = data
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            data.remove(key);
            self.remove_from_access_order(key);
        }

        if !expired.is_empty() {
            self.stats.write().expirations += expired.len() as u64;
            logger::debug(
                LogTag::Cache,
                &format!("sweep removed {} expired entries", expired.len()),
            );
        }

        expired.len()
    }

    /// Spawn the periodic expiry sweep; caller owns (and aborts) the handle
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()>
    where
        V: Send + Sync + 'static,
    {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        })
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().clone();
        stats.entries = self.len();
        stats
    }

    /// Composite health signal: the cache is doing useful work (hit rate
    /// above 0.5) and not accumulating stale entries the sweep hasn't
    /// reached yet (under 10% of total size).
    pub fn is_healthy(&self) -> bool {
        let data = self.data.read();
        let total = data.len();
        let expired = data.values().filter(|e| e.is_expired()).count();
        drop(data);

        let stale_ok = total == 0 || (expired as f64) / (total as f64) < 0.1;
        self.stats.read().hit_rate() > 0.5 && stale_ok
    }

    // ==================== Private Methods ====================

    fn evict_lru(&self, data: &mut HashMap<String, CacheEntry<V>>) {
        let mut access_order = self.access_order.write();

        while let Some(lru_key) = access_order.pop_front() {
            if data.remove(&lru_key).is_some() {
                self.stats.write().evictions += 1;
                break;
            }
        }
    }

    fn touch(&self, key: &str) {
        let mut access_order = self.access_order.write();
        access_order.retain(|k| k != key);
        access_order.push_back(key.to_string());
    }

    fn remove_from_access_order(&self, key: &str) {
        let mut access_order = self.access_order.write();
        access_order.retain(|k| k != key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn small_cache(ttl_secs: u64, capacity: usize) -> ResponseCache<String> {
        ResponseCache::new(CachePolicy::new(Duration::from_secs(ttl_secs), capacity))
    }

    #[test]
    fn basic_operations() {
        let cache = small_cache(60, 100);

        cache.set("key1", "value1".to_string(), None);
        assert_eq!(cache.get("key1"), Some("value1".to_string()));
        assert_eq!(cache.get("nonexistent"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn ttl_expiration_counts_as_miss_and_frees_slot() {
        let cache = small_cache(60, 100);
        cache.set("key", "value".to_string(), Some(Duration::from_millis(50)));

        assert_eq!(cache.get("key"), Some("value".to_string()));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get("key"), None);
        assert_eq!(cache.len(), 0);

        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn lru_eviction_removes_least_recently_touched() {
        let cache = small_cache(60, 2);

        cache.set("key1", "value1".to_string(), None);
        cache.set("key2", "value2".to_string(), None);

        // Touch key1 so key2 becomes the LRU entry
        assert!(cache.get("key1").is_some());
        cache.set("key3", "value3".to_string(), None);

        assert_eq!(cache.get("key2"), None); // evicted
        assert!(cache.get("key1").is_some());
        assert!(cache.get("key3").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn overwriting_existing_key_does_not_evict() {
        let cache = small_cache(60, 2);
        cache.set("key1", "a".to_string(), None);
        cache.set("key2", "b".to_string(), None);
        cache.set("key1", "c".to_string(), None);

        assert_eq!(cache.get("key1"), Some("c".to_string()));
        assert_eq!(cache.get("key2"), Some("b".to_string()));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn pattern_invalidation() {
        let cache = small_cache(60, 100);
        cache.set("chart:5m:tokenA", "a".to_string(), None);
        cache.set("chart:1h:tokenA", "b".to_string(), None);
        cache.set("chart:5m:tokenB", "c".to_string(), None);

        let removed = cache.invalidate_pattern("tokenA");
        assert_eq!(removed, 2);
        assert!(!cache.has("chart:5m:tokenA"));
        assert!(cache.has("chart:5m:tokenB"));
    }

    #[test]
    fn sweep_removes_expired_without_access() {
        let cache = small_cache(60, 100);
        cache.set("short", "a".to_string(), Some(Duration::from_millis(10)));
        cache.set("long", "b".to_string(), Some(Duration::from_secs(60)));

        thread::sleep(Duration::from_millis(40));
        let swept = cache.sweep();

        assert_eq!(swept, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.has("long"));
    }

    #[test]
    fn delete_returns_whether_key_existed() {
        let cache = small_cache(60, 100);
        cache.set("key", "value".to_string(), None);
        assert!(cache.delete("key"));
        assert!(!cache.delete("key"));
    }
}
