// Timeframe aggregation logic
//
// Folds fine-grained candles into coarser timeframe buckets, tracking
// gaps, invariant repairs and data-quality metrics along the way. Pure
// and deterministic: no I/O, callers may supply unsorted input.

use crate::errors::{FeedError, FeedResult};
use crate::ohlcv::types::{
    AggregationResult, Candle, MultiAggregationResult, Timeframe, ValidationReport,
};
use chrono::Utc;
use std::collections::HashMap;

pub struct OhlcvAggregator;

impl OhlcvAggregator {
    /// Aggregate source candles to a target timeframe
    pub fn aggregate(
        source: &[Candle],
        target_timeframe: Timeframe,
    ) -> FeedResult<AggregationResult> {
        let spec = target_timeframe.spec();
        let mut warnings: Vec<String> = Vec::new();

        if source.is_empty() {
            return Ok(AggregationResult {
                timeframe: target_timeframe,
                candles: Vec::new(),
                source_candle_count: 0,
                output_candle_count: 0,
                data_loss_percentage: 0.0,
                bucket_completion_rate: 0.0,
                warnings,
            });
        }

        Self::check_bucketable(source)?;

        // Defensive sort - upstream feeds are not guaranteed ordered
        let mut sorted: Vec<&Candle> = source.iter().collect();
        sorted.sort_by_key(|c| c.timestamp);

        let bucket_width = target_timeframe.to_seconds();

        // Walk the sorted candles, closing buckets as timestamps cross
        // bucket boundaries. Gaps are recorded, never filled with
        // fabricated empty buckets.
        let mut emitted: Vec<Candle> = Vec::new();
        let mut bucket_start = (sorted[0].timestamp / bucket_width) * bucket_width;
        let mut bucket: Vec<&Candle> = Vec::new();
        let mut non_empty_buckets = 0usize;

        for candle in &sorted {
            if candle.timestamp >= bucket_start + bucket_width {
                if !bucket.is_empty() {
                    emitted.push(Self::fold_bucket(bucket_start, &bucket, &mut warnings));
                    non_empty_buckets += 1;
                    bucket.clear();
                }

                // Recompute the boundary directly - the next candle need
                // not land in the immediately following bucket.
                let next_start = (candle.timestamp / bucket_width) * bucket_width;
                let skipped = (next_start - bucket_start) / bucket_width - 1;
                if skipped > 0 {
                    warnings.push(format!(
                        "data gap of {} missing intervals before bucket at {}",
                        skipped, next_start
                    ));
                }
                bucket_start = next_start;
            }
            bucket.push(candle);
        }

        if !bucket.is_empty() {
            emitted.push(Self::fold_bucket(bucket_start, &bucket, &mut warnings));
            non_empty_buckets += 1;
        }

        // Buckets spanned includes the empty ones implied by gaps
        let first_start = emitted.first().map(|c| c.timestamp).unwrap_or(0);
        let last_start = emitted.last().map(|c| c.timestamp).unwrap_or(0);
        let total_buckets = ((last_start - first_start) / bucket_width + 1).max(1) as usize;
        let bucket_completion_rate = non_empty_buckets as f64 / total_buckets as f64;

        // Sliding window cap, oldest first discarded
        if emitted.len() > spec.max_retained_points {
            let dropped = emitted.len() - spec.max_retained_points;
            emitted.drain(0..dropped);
            warnings.push(format!(
                "truncated {} oldest candles to retention cap of {}",
                dropped, spec.max_retained_points
            ));
        }

        // Naive expectation assuming perfectly dense 1-minute input;
        // clamped because sparse input can push it past 100.
        let expected_buckets =
            ((source.len() as f64) / (spec.interval_minutes as f64)).ceil().max(1.0);
        let data_loss_percentage = ((expected_buckets - non_empty_buckets as f64)
            .max(0.0)
            / expected_buckets
            * 100.0)
            .clamp(0.0, 100.0);

        Ok(AggregationResult {
            timeframe: target_timeframe,
            source_candle_count: source.len(),
            output_candle_count: emitted.len(),
            candles: emitted,
            data_loss_percentage,
            bucket_completion_rate,
            warnings,
        })
    }

    /// Aggregate several timeframes from one source pass
    ///
    /// Each target is aggregated independently; a failure in one is
    /// reported as an empty result with a warning and never aborts the
    /// batch.
    pub fn aggregate_all(
        source: &[Candle],
        targets: &[Timeframe],
    ) -> MultiAggregationResult {
        let mut results: HashMap<Timeframe, AggregationResult> = HashMap::new();

        for &target in targets {
            let result = match Self::aggregate(source, target) {
                Ok(result) => result,
                Err(err) => AggregationResult::empty_with_warning(
                    target,
                    format!("aggregation failed for {}: {}", target, err),
                ),
            };
            results.insert(target, result);
        }

        MultiAggregationResult {
            results,
            source_candle_count: source.len(),
            generated_at: Utc::now(),
        }
    }

    /// Validate a candle sequence without mutating it
    pub fn validate(candles: &[Candle]) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (i, candle) in candles.iter().enumerate() {
            if candle.high < candle.low {
                report
                    .errors
                    .push(format!("candle {}: high {} < low {}", i, candle.high, candle.low));
            } else if candle.open > candle.high
                || candle.open < candle.low
                || candle.close > candle.high
                || candle.close < candle.low
            {
                report.errors.push(format!(
                    "candle {}: open/close outside high-low range",
                    i
                ));
            }
            if candle.volume < 0.0 {
                report
                    .errors
                    .push(format!("candle {}: negative volume {}", i, candle.volume));
            }
            if candle.timestamp <= 0 {
                report
                    .errors
                    .push(format!("candle {}: non-positive timestamp", i));
            }
        }

        // Ordering is a warning, not fatal - feeds are not guaranteed sorted
        for window in candles.windows(2) {
            if window[1].timestamp < window[0].timestamp {
                report
                    .warnings
                    .push("candles are not in ascending timestamp order".to_string());
                break;
            }
        }

        report
    }

    // ==================== Private Methods ====================

    fn check_bucketable(source: &[Candle]) -> FeedResult<()> {
        for candle in source {
            if candle.timestamp <= 0 {
                return Err(FeedError::Aggregation(format!(
                    "candle has non-positive timestamp {}",
                    candle.timestamp
                )));
            }
            let prices = [candle.open, candle.high, candle.low, candle.close];
            if prices.iter().any(|p| !p.is_finite()) || !candle.volume.is_finite() {
                return Err(FeedError::Aggregation(format!(
                    "candle at {} has non-finite fields",
                    candle.timestamp
                )));
            }
        }
        Ok(())
    }

    /// Fold one bucket's candles into a single output candle.
    ///
    /// OHLCV aggregation rules:
    /// - Open: first candle's open
    /// - High: maximum high
    /// - Low: minimum low
    /// - Close: last candle's close
    /// - Volume: sum of all volumes
    fn fold_bucket(bucket_start: i64, points: &[&Candle], warnings: &mut Vec<String>) -> Candle {
        let open = points.first().map(|c| c.open).unwrap_or(0.0);
        let close = points.last().map(|c| c.close).unwrap_or(0.0);
        let high = points.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        let low = points.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let volume: f64 = points.iter().map(|c| c.volume).sum();

        let quote_volume = if points.iter().any(|c| c.quote_volume.is_some()) {
            Some(points.iter().filter_map(|c| c.quote_volume).sum())
        } else {
            None
        };
        let trade_count = if points.iter().any(|c| c.trade_count.is_some()) {
            Some(points.iter().filter_map(|c| c.trade_count).sum())
        } else {
            None
        };

        let mut candle = Candle {
            timestamp: bucket_start,
            open,
            high,
            low,
            close,
            volume,
            quote_volume,
            trade_count,
        };

        if candle.repair() {
            warnings.push(format!(
                "corrected OHLC invariant violation in bucket at {}",
                bucket_start
            ));
        }

        candle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minute_candles(closes: &[f64], start_minute: i64) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let base = close;
                Candle::new(
                    (start_minute + i as i64) * 60 + 86_400,
                    base,
                    base + 0.5,
                    base - 0.5,
                    close,
                    100.0,
                )
            })
            .collect()
    }

    fn candles_at_minutes(minutes: &[i64]) -> Vec<Candle> {
        minutes
            .iter()
            .map(|&m| Candle::new(m * 60 + 86_400, 1.0, 1.5, 0.5, 1.0, 100.0))
            .collect()
    }

    #[test]
    fn five_minute_aggregation_folds_ten_candles_into_two() {
        let source = minute_candles(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0], 0);
        let result = OhlcvAggregator::aggregate(&source, Timeframe::Minute5).unwrap();

        assert_eq!(result.output_candle_count, 2);
        let first = &result.candles[0];
        let second = &result.candles[1];

        assert_eq!(first.open, source[0].open);
        assert_eq!(first.close, source[4].close);
        assert_eq!(first.volume, 500.0);
        assert_eq!(first.high, 5.5);
        assert_eq!(first.low, 0.5);

        assert_eq!(second.open, source[5].open);
        assert_eq!(second.close, source[9].close);
        assert_eq!(second.volume, 500.0);
        assert_eq!(second.high, 10.5);
        assert_eq!(second.low, 5.5);

        assert_eq!(result.data_loss_percentage, 0.0);
        assert_eq!(result.bucket_completion_rate, 1.0);
    }

    #[test]
    fn gap_detection_reports_missing_intervals() {
        let source = candles_at_minutes(&[0, 1, 2, 10, 11, 12]);
        let result = OhlcvAggregator::aggregate(&source, Timeframe::Minute1).unwrap();

        // One candle per source point, no fabricated fill
        assert_eq!(result.output_candle_count, 6);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("data gap of 7 missing intervals")));

        // 6 non-empty of 13 spanned buckets
        assert!((result.bucket_completion_rate - 6.0 / 13.0).abs() < 1e-9);
    }

    #[test]
    fn unsorted_input_is_sorted_before_bucketing() {
        let mut source = minute_candles(&[1.0, 2.0, 3.0, 4.0, 5.0], 0);
        source.reverse();
        let result = OhlcvAggregator::aggregate(&source, Timeframe::Minute5).unwrap();

        assert_eq!(result.output_candle_count, 1);
        assert_eq!(result.candles[0].open, 1.0);
        assert_eq!(result.candles[0].close, 5.0);
    }

    #[test]
    fn reaggregation_at_same_width_is_a_noop() {
        let source = minute_candles(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0], 0);
        let first_pass = OhlcvAggregator::aggregate(&source, Timeframe::Minute5).unwrap();
        let second_pass =
            OhlcvAggregator::aggregate(&first_pass.candles, Timeframe::Minute5).unwrap();

        assert_eq!(first_pass.candles, second_pass.candles);
    }

    #[test]
    fn inverted_high_low_is_repaired_with_warning() {
        let mut source = minute_candles(&[1.0, 2.0], 0);
        // Transcription error: high and low swapped
        let first = &mut source[0];
        std::mem::swap(&mut first.high, &mut first.low);
        let result = OhlcvAggregator::aggregate(&source, Timeframe::Minute5).unwrap();

        let candle = &result.candles[0];
        assert!(candle.low <= candle.high);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("corrected OHLC invariant")));
    }

    #[test]
    fn empty_input_yields_empty_result() {
        let result = OhlcvAggregator::aggregate(&[], Timeframe::Hour1).unwrap();
        assert_eq!(result.output_candle_count, 0);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn quote_volume_and_trade_count_are_summed() {
        let mut source = minute_candles(&[1.0, 2.0], 0);
        source[0].quote_volume = Some(10.0);
        source[1].quote_volume = Some(20.0);
        source[0].trade_count = Some(3);
        source[1].trade_count = Some(4);

        let result = OhlcvAggregator::aggregate(&source, Timeframe::Minute5).unwrap();
        assert_eq!(result.candles[0].quote_volume, Some(30.0));
        assert_eq!(result.candles[0].trade_count, Some(7));
    }

    #[test]
    fn malformed_timeframe_is_isolated_in_batch() {
        let mut source = minute_candles(&[1.0, 2.0, 3.0], 0);
        source[1].high = f64::NAN;

        let multi = OhlcvAggregator::aggregate_all(
            &source,
            &[Timeframe::Minute5, Timeframe::Minute15],
        );

        // Both targets see the same bad input; both isolate, neither panics
        assert_eq!(multi.results.len(), 2);
        for result in multi.results.values() {
            assert!(result.candles.is_empty());
            assert!(!result.warnings.is_empty());
        }
    }

    #[test]
    fn retention_cap_truncates_oldest() {
        // 5000 minutes of data against a 720-point 1m retention cap
        let closes: Vec<f64> = (0..5000).map(|i| 1.0 + (i % 7) as f64).collect();
        let source = minute_candles(&closes, 0);
        let result = OhlcvAggregator::aggregate(&source, Timeframe::Minute1).unwrap();

        assert_eq!(result.output_candle_count, 720);
        assert!(result.warnings.iter().any(|w| w.contains("truncated")));
        // Most recent data survives
        assert_eq!(
            result.candles.last().unwrap().timestamp,
            source.last().unwrap().timestamp
        );
    }

    #[test]
    fn validate_flags_corruption_and_ordering() {
        let mut candles = minute_candles(&[1.0, 2.0, 3.0], 0);
        candles[0].high = 0.1; // high < low
        candles[1].volume = -5.0;
        candles.swap(1, 2);

        let report = OhlcvAggregator::validate(&candles);
        assert!(report.errors.iter().any(|e| e.contains("high")));
        assert!(report.errors.iter().any(|e| e.contains("negative volume")));
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("ascending timestamp order")));
    }
}
