// OHLCV candle types and timeframe aggregation

pub mod aggregator;
pub mod types;

pub use aggregator::OhlcvAggregator;
pub use types::{
    AggregationResult, Candle, MultiAggregationResult, Timeframe, TimeframeSpec, ValidationReport,
};
