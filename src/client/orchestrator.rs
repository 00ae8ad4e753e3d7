//! Fetch orchestration: cache, admission, retry ladder, aggregation
//!
//! Composes the limiter, breaker, cache and aggregator into the
//! caller-facing chart API. A multi-timeframe request is satisfied from
//! one fetch of the finest interval covering the union of the uncached
//! timeframes' lookback windows; each timeframe's result is cached
//! independently with its own TTL.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use crate::cache::{CachePolicy, CacheStats, ResponseCache};
use crate::config::FeedConfig;
use crate::errors::{FeedError, FeedResult};
use crate::limiter::{backoff_delay, LimiterConfig, TokenBucketLimiter};
use crate::logger::{self, LogTag};
use crate::ohlcv::aggregator::OhlcvAggregator;
use crate::ohlcv::types::{Candle, Timeframe};

use super::http::{CandleSource, UpstreamClient, MAX_CANDLES_PER_REQUEST};
use super::metrics::{ClientMetrics, RequestStats};

/// Extra lookback added to the combined fetch window, capped at 12 hours
/// or 25% of the window, to improve early-movement detection at the
/// finer timeframes.
fn lookback_buffer_hours(lookback_hours: i64) -> i64 {
    (lookback_hours / 4).min(12).max(1)
}

fn chart_key(timeframe: Timeframe, token: &str) -> String {
    format!("chart:{}:{}", timeframe.as_str(), token)
}

/// Per-timeframe chart data plus accumulated diagnostics
#[derive(Debug, Clone)]
pub struct MultiTimeframeChart {
    pub charts: HashMap<Timeframe, Vec<Candle>>,
    pub warnings: Vec<String>,
    pub errors: HashMap<Timeframe, String>,
}

/// Composite health signal for downstream monitoring
#[derive(Debug, Clone)]
pub struct FeedHealth {
    pub breaker_phase: String,
    pub cache_hit_rate: f64,
    pub cache_healthy: bool,
    pub queue_depth: usize,
}

/// Full metrics snapshot
#[derive(Debug, Clone)]
pub struct FeedMetrics {
    pub requests: RequestStats,
    pub cache: CacheStats,
    pub breaker: CircuitBreakerStats,
}

pub struct ChartClient {
    config: FeedConfig,
    source: Arc<dyn CandleSource>,
    limiter: TokenBucketLimiter,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<ResponseCache<Vec<Candle>>>,
    metrics: Arc<ClientMetrics>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl ChartClient {
    /// Build a client talking to the configured upstream provider
    pub fn new(config: FeedConfig) -> FeedResult<Self> {
        config.validate()?;
        let upstream = UpstreamClient::new(&config.base_url, config.request_timeout())?;
        Ok(Self::with_source(config, Arc::new(upstream)))
    }

    /// Build a client over an arbitrary candle source (used by tests)
    pub fn with_source(config: FeedConfig, source: Arc<dyn CandleSource>) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            &config.base_url,
            CircuitBreakerConfig::from_config(&config),
        ));
        let limiter =
            TokenBucketLimiter::new(LimiterConfig::from_config(&config)).with_breaker(Arc::clone(&breaker));

        let cache = Arc::new(ResponseCache::new(CachePolicy::from_config(&config)));
        let sweeper = cache.spawn_sweeper(CachePolicy::from_config(&config).sweep_interval);

        Self {
            config,
            source,
            limiter,
            breaker,
            cache,
            metrics: Arc::new(ClientMetrics::new()),
            sweeper,
        }
    }

    // ==================== Public API ====================

    /// Chart data for one timeframe
    ///
    /// With no explicit range, the timeframe's configured lookback window
    /// (ending now) is used and results are cached under a
    /// timeframe-scoped key.
    pub async fn get_chart_data(
        &self,
        token: &str,
        timeframe: Timeframe,
        range: Option<(i64, i64)>,
    ) -> FeedResult<Vec<Candle>> {
        let key = match range {
            None => chart_key(timeframe, token),
            Some((from, to)) => format!("chart:{}:{}:{}:{}", timeframe.as_str(), token, from, to),
        };

        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let (source_candles, _warnings) = match range {
            None => {
                let lookback = timeframe.spec().source_hours_to_fetch;
                self.fetch_source_window(token, lookback + lookback_buffer_hours(lookback))
                    .await?
            }
            Some((from, to)) => {
                let candles = self
                    .fetch_upstream(token, Timeframe::Minute1, from, to, MAX_CANDLES_PER_REQUEST)
                    .await?;
                (candles, Vec::new())
            }
        };

        let result = OhlcvAggregator::aggregate(&source_candles, timeframe)?;
        self.cache.set(&key, result.candles.clone(), None);
        Ok(result.candles)
    }

    /// Chart data for several timeframes from at most one upstream fetch
    pub async fn get_multi_timeframe_chart(
        &self,
        token: &str,
        timeframes: &[Timeframe],
    ) -> FeedResult<MultiTimeframeChart> {
        let mut charts: HashMap<Timeframe, Vec<Candle>> = HashMap::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut errors: HashMap<Timeframe, String> = HashMap::new();

        // Serve what we can from cache and collect the rest
        let mut uncached: Vec<Timeframe> = Vec::new();
        for &tf in timeframes {
            match self.cache.get(&chart_key(tf, token)) {
                Some(candles) => {
                    charts.insert(tf, candles);
                }
                None => uncached.push(tf),
            }
        }

        if uncached.is_empty() {
            return Ok(MultiTimeframeChart {
                charts,
                warnings,
                errors,
            });
        }

        // One fetch of the finest interval covering the union of the
        // uncached timeframes' lookback windows
        let lookback = uncached
            .iter()
            .map(|tf| tf.spec().source_hours_to_fetch)
            .max()
            .unwrap_or(24);
        let window_hours = lookback + lookback_buffer_hours(lookback);

        // A fetch failure must not throw away charts already served from
        // cache; the failure is recorded per uncached timeframe instead.
        // Only a request that yields nothing at all fails hard.
        let (source_candles, fetch_warnings) =
            match self.fetch_source_window(token, window_hours).await {
                Ok(fetched) => fetched,
                Err(err) if !charts.is_empty() => {
                    let message = err.to_string();
                    logger::warning(
                        LogTag::Fetch,
                        &format!("{}: serving cached timeframes only: {}", token, message),
                    );
                    warnings.push(format!("upstream fetch failed, serving cached data: {}", message));
                    for tf in uncached {
                        errors.insert(tf, message.clone());
                    }
                    return Ok(MultiTimeframeChart {
                        charts,
                        warnings,
                        errors,
                    });
                }
                Err(err) => return Err(err),
            };
        warnings.extend(fetch_warnings);

        // Single aggregation pass produces every uncached timeframe
        let multi = OhlcvAggregator::aggregate_all(&source_candles, &uncached);
        for (tf, result) in multi.results {
            let failed = result.source_candle_count == 0 && !source_candles.is_empty();
            for warning in &result.warnings {
                warnings.push(format!("{}: {}", tf, warning));
            }

            if failed {
                errors.insert(tf, result.warnings.join("; "));
                continue;
            }

            // Best-effort cache write; each timeframe gets its class TTL
            self.cache.set(&chart_key(tf, token), result.candles.clone(), None);
            charts.insert(tf, result.candles);
        }

        Ok(MultiTimeframeChart {
            charts,
            warnings,
            errors,
        })
    }

    /// Drop all cached entries for a token
    pub fn invalidate_token(&self, token: &str) -> usize {
        self.cache.invalidate_pattern(token)
    }

    pub async fn health(&self) -> FeedHealth {
        let cache_stats = self.cache.stats();
        FeedHealth {
            breaker_phase: self.breaker.current_phase().await.to_string(),
            cache_hit_rate: cache_stats.hit_rate(),
            cache_healthy: self.cache.is_healthy(),
            queue_depth: self.limiter.queue_depth(),
        }
    }

    pub async fn metrics(&self) -> FeedMetrics {
        FeedMetrics {
            requests: self.metrics.snapshot(),
            cache: self.cache.stats(),
            breaker: self.breaker.stats().await,
        }
    }

    /// Administrative breaker reset (e.g. for tests or manual recovery)
    pub async fn reset_breaker(&self) {
        self.breaker.reset().await;
    }

    // ==================== Fetch Ladder ====================

    /// Fetch the finest-interval source series for a lookback window,
    /// escalating when the upstream under-delivers:
    /// 1. direct 1-minute fetch over the window
    /// 2. same interval, roughly doubled lookback
    /// 3. next-coarser interval sized for the same minimum point count
    ///
    /// Partial data is returned with a warning; only zero data across
    /// every rung is a hard failure.
    async fn fetch_source_window(
        &self,
        token: &str,
        window_hours: i64,
    ) -> FeedResult<(Vec<Candle>, Vec<String>)> {
        let source_key = format!("chart:1m:{}:{}h", token, window_hours);
        if let Some(cached) = self.cache.get(&source_key) {
            return Ok((cached, Vec::new()));
        }

        let min_points = self.config.min_points;
        let now = Utc::now().timestamp();
        let mut warnings: Vec<String> = Vec::new();
        let mut best: Vec<Candle> = Vec::new();
        let mut last_error: Option<FeedError> = None;

        // Rung 1: direct fetch
        let from = now - window_hours * 3600;
        match self
            .fetch_upstream(token, Timeframe::Minute1, from, now, MAX_CANDLES_PER_REQUEST)
            .await
        {
            Ok(candles) => best = candles,
            Err(err) if err.is_retryable() => last_error = Some(err),
            Err(err) => return Err(err),
        }

        if best.len() < min_points {
            // Rung 2: same interval, doubled lookback
            self.stagger().await;
            let from = now - window_hours * 2 * 3600;
            logger::debug(
                LogTag::Fetch,
                &format!(
                    "{}: {} candles below minimum {}, extending range to {}h",
                    token,
                    best.len(),
                    min_points,
                    window_hours * 2
                ),
            );
            match self
                .fetch_upstream(token, Timeframe::Minute1, from, now, MAX_CANDLES_PER_REQUEST)
                .await
            {
                Ok(candles) => {
                    if candles.len() > best.len() {
                        best = candles;
                        warnings.push(format!(
                            "extended lookback to {}h to reach minimum point count",
                            window_hours * 2
                        ));
                    }
                }
                Err(err) => last_error = Some(err),
            }
        }

        if best.len() < min_points {
            // Rung 3: next-coarser interval, range sized for min_points
            if let Some(coarser) = Timeframe::Minute1.next_coarser() {
                self.stagger().await;
                let span_secs = (min_points as i64) * coarser.to_seconds() * 2;
                let from = now - span_secs.max(window_hours * 3600);
                logger::debug(
                    LogTag::Fetch,
                    &format!(
                        "{}: still {} candles, falling back to {} interval",
                        token,
                        best.len(),
                        coarser
                    ),
                );
                match self
                    .fetch_upstream(token, coarser, from, now, MAX_CANDLES_PER_REQUEST)
                    .await
                {
                    Ok(candles) => {
                        if candles.len() > best.len() {
                            best = candles;
                            warnings.push(format!(
                                "fell back to {} source interval after 1m under-delivered",
                                coarser
                            ));
                        }
                    }
                    Err(err) => last_error = Some(err),
                }
            }
        }

        if best.is_empty() {
            // The only hard-failure case: no data from any rung
            return Err(last_error.unwrap_or(FeedError::InsufficientData {
                wanted: min_points,
                got: 0,
            }));
        }

        if best.len() < min_points {
            warnings.push(format!(
                "returning partial data: {} candles, wanted at least {}",
                best.len(),
                min_points
            ));
        }

        // Best-effort: the source series is the expensive call, reuse it
        // across sibling requests under its own short TTL
        self.cache.set(&source_key, best.clone(), None);

        Ok((best, warnings))
    }

    /// One admission-gated upstream call with bounded retries
    async fn fetch_upstream(
        &self,
        token: &str,
        interval: Timeframe,
        time_from: i64,
        time_to: i64,
        limit: usize,
    ) -> FeedResult<Vec<Candle>> {
        let base_delay = std::time::Duration::from_millis(self.config.retry_base_delay_ms);
        let mut attempt: u32 = 0;

        loop {
            let result = self
                .fetch_upstream_once(token, interval, time_from, time_to, limit)
                .await;

            match result {
                Ok(candles) => return Ok(candles),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(&err, attempt, base_delay);
                    logger::warning(
                        LogTag::Fetch,
                        &format!(
                            "{}: attempt {} failed ({}), retrying in {} ms",
                            token,
                            attempt + 1,
                            err,
                            delay.as_millis()
                        ),
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_upstream_once(
        &self,
        token: &str,
        interval: Timeframe,
        time_from: i64,
        time_to: i64,
        limit: usize,
    ) -> FeedResult<Vec<Candle>> {
        // Admission: breaker checked inside the limiter pairing
        self.limiter.acquire().await?;

        let start = Instant::now();
        match self
            .source
            .fetch_candles(token, interval, time_from, time_to, limit)
            .await
        {
            Ok(candles) => {
                self.breaker.record_success().await;
                self.metrics.record_success(start.elapsed().as_millis() as u64);
                Ok(candles)
            }
            Err(err) => {
                if err.is_rate_limit() {
                    self.metrics.record_rate_limited();
                } else {
                    self.metrics.record_failure(start.elapsed().as_millis() as u64);
                }
                // 429s and caller errors are filtered inside the breaker
                self.breaker.record_failure(&err).await;
                Err(err)
            }
        }
    }

    async fn stagger(&self) {
        let delay = self.config.stagger_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Drop for ChartClient {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}
