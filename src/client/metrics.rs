/// Request counters and latency tracking for the upstream client
///
/// Latency percentiles are computed from a bounded sample buffer; old
/// samples rotate out, so percentiles reflect recent behavior rather
/// than process lifetime.
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Latency samples retained for percentile computation
const LATENCY_SAMPLE_CAP: usize = 512;

#[derive(Debug, Default)]
pub struct ClientMetrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    rate_limited_requests: AtomicU64,
    latencies_ms: Mutex<VecDeque<u64>>,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, latency_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        self.push_latency(latency_ms);
    }

    pub fn record_failure(&self, latency_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        self.push_latency(latency_ms);
    }

    pub fn record_rate_limited(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.rate_limited_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RequestStats {
        RequestStats {
            total: self.total_requests.load(Ordering::Relaxed),
            successful: self.successful_requests.load(Ordering::Relaxed),
            failed: self.failed_requests.load(Ordering::Relaxed),
            rate_limited: self.rate_limited_requests.load(Ordering::Relaxed),
            latency_p50_ms: self.percentile(0.50),
            latency_p95_ms: self.percentile(0.95),
            latency_p99_ms: self.percentile(0.99),
        }
    }

    fn push_latency(&self, latency_ms: u64) {
        let mut samples = self.latencies_ms.lock();
        if samples.len() >= LATENCY_SAMPLE_CAP {
            samples.pop_front();
        }
        samples.push_back(latency_ms);
    }

    fn percentile(&self, p: f64) -> u64 {
        let samples = self.latencies_ms.lock();
        if samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let rank = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[rank.min(sorted.len() - 1)]
    }
}

/// Point-in-time request statistics
#[derive(Debug, Clone)]
pub struct RequestStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub rate_limited: u64,
    pub latency_p50_ms: u64,
    pub latency_p95_ms: u64,
    pub latency_p99_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = ClientMetrics::new();
        metrics.record_success(10);
        metrics.record_failure(20);
        metrics.record_rate_limited();

        let stats = metrics.snapshot();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.rate_limited, 1);
    }

    #[test]
    fn percentiles_from_samples() {
        let metrics = ClientMetrics::new();
        for latency in 1..=100 {
            metrics.record_success(latency);
        }

        let stats = metrics.snapshot();
        assert!(stats.latency_p50_ms >= 45 && stats.latency_p50_ms <= 55);
        assert!(stats.latency_p95_ms >= 90);
        assert!(stats.latency_p99_ms >= stats.latency_p95_ms);
    }

    #[test]
    fn sample_buffer_is_bounded() {
        let metrics = ClientMetrics::new();
        for latency in 0..2000 {
            metrics.record_success(latency);
        }
        // Only recent samples remain, so p50 reflects the tail
        let stats = metrics.snapshot();
        assert!(stats.latency_p50_ms > 1000);
    }
}
