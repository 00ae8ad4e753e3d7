//! candlefeed - resilient multi-timeframe OHLCV acquisition
//!
//! Fetches candle data from a strict rate-limited upstream provider and
//! serves it per timeframe from one shared fine-grained fetch. The
//! pipeline layers, outermost first:
//!
//! - [`client::ChartClient`] orchestrates caching, fetching and
//!   aggregation behind the public chart API
//! - [`limiter`] paces outbound requests with a token bucket and FIFO
//!   admission queue
//! - [`breaker`] trips on sustained upstream failures and probes
//!   recovery through a half-open phase
//! - [`cache`] holds responses under per-class TTLs with LRU eviction
//! - [`ohlcv`] aggregates 1-minute candles into coarser timeframes
//!
//! ```no_run
//! use candlefeed::client::ChartClient;
//! use candlefeed::config::FeedConfig;
//! use candlefeed::ohlcv::Timeframe;
//!
//! # async fn example() -> candlefeed::errors::FeedResult<()> {
//! let client = ChartClient::new(FeedConfig::from_env()?)?;
//! let chart = client
//!     .get_multi_timeframe_chart("So11111111111111111111111111111111111111112",
//!         &[Timeframe::Minute5, Timeframe::Hour1])
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod cache;
pub mod client;
pub mod config;
pub mod errors;
pub mod limiter;
pub mod logger;
pub mod ohlcv;

pub use client::ChartClient;
pub use config::FeedConfig;
pub use errors::{FeedError, FeedResult};
pub use ohlcv::{Candle, Timeframe};
