// Upstream client: HTTP source, metrics, and the fetch orchestrator

pub mod http;
pub mod metrics;
pub mod orchestrator;

pub use http::{CandleSource, UpstreamClient, MAX_CANDLES_PER_REQUEST};
pub use metrics::{ClientMetrics, RequestStats};
pub use orchestrator::{ChartClient, FeedHealth, FeedMetrics, MultiTimeframeChart};
