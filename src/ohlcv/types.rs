// Core types for the OHLCV module

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Supported timeframes for OHLCV data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
}

impl Timeframe {
    /// Bucket width in minutes
    pub fn interval_minutes(&self) -> i64 {
        match self {
            Timeframe::Minute1 => 1,
            Timeframe::Minute5 => 5,
            Timeframe::Minute15 => 15,
            Timeframe::Hour1 => 60,
            Timeframe::Hour4 => 240,
        }
    }

    /// Bucket width in seconds
    pub fn to_seconds(&self) -> i64 {
        self.interval_minutes() * 60
    }

    /// Upstream API parameter for this timeframe
    pub fn to_api_param(&self) -> &'static str {
        self.as_str()
    }

    /// All supported timeframes, finest first
    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::Minute1,
            Timeframe::Minute5,
            Timeframe::Minute15,
            Timeframe::Hour1,
            Timeframe::Hour4,
        ]
    }

    /// Next coarser supported interval, if any
    pub fn next_coarser(&self) -> Option<Timeframe> {
        match self {
            Timeframe::Minute1 => Some(Timeframe::Minute5),
            Timeframe::Minute5 => Some(Timeframe::Minute15),
            Timeframe::Minute15 => Some(Timeframe::Hour1),
            Timeframe::Hour1 => Some(Timeframe::Hour4),
            Timeframe::Hour4 => None,
        }
    }

    pub fn parse(s: &str) -> Option<Timeframe> {
        match s {
            "1m" => Some(Timeframe::Minute1),
            "5m" => Some(Timeframe::Minute5),
            "15m" => Some(Timeframe::Minute15),
            "1h" => Some(Timeframe::Hour1),
            "4h" => Some(Timeframe::Hour4),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Minute1 => "1m",
            Timeframe::Minute5 => "5m",
            Timeframe::Minute15 => "15m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
        }
    }

    /// Static fetch/retention settings for this timeframe
    pub fn spec(&self) -> TimeframeSpec {
        match self {
            Timeframe::Minute1 => TimeframeSpec {
                interval_minutes: 1,
                max_retained_points: 720,
                source_hours_to_fetch: 6,
            },
            Timeframe::Minute5 => TimeframeSpec {
                interval_minutes: 5,
                max_retained_points: 288,
                source_hours_to_fetch: 24,
            },
            Timeframe::Minute15 => TimeframeSpec {
                interval_minutes: 15,
                max_retained_points: 192,
                source_hours_to_fetch: 48,
            },
            Timeframe::Hour1 => TimeframeSpec {
                interval_minutes: 60,
                max_retained_points: 96,
                source_hours_to_fetch: 96,
            },
            Timeframe::Hour4 => TimeframeSpec {
                interval_minutes: 240,
                max_retained_points: 42,
                source_hours_to_fetch: 168,
            },
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static configuration per supported timeframe
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeframeSpec {
    pub interval_minutes: i64,
    /// Sliding window cap on emitted candles
    pub max_retained_points: usize,
    /// How much 1-minute history is needed to populate this timeframe
    pub source_hours_to_fetch: i64,
}

impl TimeframeSpec {
    /// Retention must cover the fetch window, otherwise the cap silently
    /// truncates legitimate history.
    pub fn covers_fetch_window(&self) -> bool {
        (self.max_retained_points as i64) * self.interval_minutes
            >= self.source_hours_to_fetch * 60
    }
}

/// A single OHLCV candle over one fixed-width time bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Start-of-bucket, seconds since epoch
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_count: Option<u32>,
}

impl Candle {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            quote_volume: None,
            trade_count: None,
        }
    }

    /// Checks `low <= min(open, close) <= max(open, close) <= high`
    pub fn is_valid(&self) -> bool {
        self.high >= self.low
            && self.open >= self.low
            && self.open <= self.high
            && self.close >= self.low
            && self.close <= self.high
            && self.volume >= 0.0
    }

    /// Widen high/low to the minimal values that restore the OHLC
    /// invariant. Returns true if a correction was applied.
    pub fn repair(&mut self) -> bool {
        if self.is_valid() {
            return false;
        }
        if self.high < self.low {
            std::mem::swap(&mut self.high, &mut self.low);
        }
        self.high = self.high.max(self.open).max(self.close);
        self.low = self.low.min(self.open).min(self.close);
        true
    }
}

/// Output of aggregating one timeframe
#[derive(Debug, Clone, Serialize)]
pub struct AggregationResult {
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
    pub source_candle_count: usize,
    pub output_candle_count: usize,
    /// Rough data-quality signal, clamped to [0, 100]. Assumes perfectly
    /// dense 1-minute input, so treat it as indicative, not exact.
    pub data_loss_percentage: f64,
    /// Non-empty buckets over total buckets spanned (gaps included)
    pub bucket_completion_rate: f64,
    pub warnings: Vec<String>,
}

impl AggregationResult {
    /// Empty result carrying an explanatory warning, used when one
    /// timeframe fails without aborting its siblings.
    pub fn empty_with_warning(timeframe: Timeframe, warning: String) -> Self {
        Self {
            timeframe,
            candles: Vec::new(),
            source_candle_count: 0,
            output_candle_count: 0,
            data_loss_percentage: 0.0,
            bucket_completion_rate: 0.0,
            warnings: vec![warning],
        }
    }
}

/// Output of aggregating several timeframes from one source fetch
#[derive(Debug, Clone, Serialize)]
pub struct MultiAggregationResult {
    pub results: HashMap<Timeframe, AggregationResult>,
    pub source_candle_count: usize,
    pub generated_at: DateTime<Utc>,
}

/// Result of validating a candle sequence
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_roundtrip() {
        for tf in Timeframe::all() {
            assert_eq!(Timeframe::parse(tf.as_str()), Some(tf));
        }
    }

    #[test]
    fn specs_cover_fetch_windows() {
        for tf in Timeframe::all() {
            assert!(
                tf.spec().covers_fetch_window(),
                "{} retention window does not cover its fetch window",
                tf
            );
        }
    }

    #[test]
    fn candle_repair_swaps_inverted_high_low() {
        let mut candle = Candle::new(0, 5.0, 2.0, 8.0, 5.0, 100.0);
        assert!(!candle.is_valid());
        assert!(candle.repair());
        assert!(candle.is_valid());
        assert!(candle.low <= candle.high);
    }

    #[test]
    fn candle_repair_widens_range_to_cover_open_close() {
        let mut candle = Candle::new(0, 10.0, 9.0, 8.5, 7.0, 50.0);
        assert!(candle.repair());
        assert!(candle.high >= candle.open);
        assert!(candle.low <= candle.close);
    }

    #[test]
    fn valid_candle_untouched_by_repair() {
        let mut candle = Candle::new(0, 1.0, 2.0, 0.5, 1.5, 10.0);
        assert!(!candle.repair());
    }
}
