/// Upstream HTTP candle provider client
///
/// Consumes one externally defined HTTP/JSON endpoint family. The
/// provider serves candle lists either wrapped (`{success, data}`) or as
/// a bare payload, and signals failures through an error envelope
/// (`{success: false, error: {code, message}}`) or plain HTTP status
/// codes; both shapes are tolerated here.
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::errors::{FeedError, FeedResult};
use crate::logger::{self, LogTag};
use crate::ohlcv::types::{Candle, Timeframe};

/// Upstream hard cap on candles per request
pub const MAX_CANDLES_PER_REQUEST: usize = 1000;

/// Seam between the orchestrator and the wire
///
/// Implemented by the real HTTP client and by in-memory sources in
/// tests.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch_candles(
        &self,
        token: &str,
        interval: Timeframe,
        time_from: i64,
        time_to: i64,
        limit: usize,
    ) -> FeedResult<Vec<Candle>>;
}

// ==================== Wire Types ====================

#[derive(Deserialize, Debug)]
struct WireCandle {
    open: f64,
    close: f64,
    low: f64,
    high: f64,
    volume: f64,
    #[serde(default)]
    quote_volume: Option<f64>,
    #[serde(default)]
    trade_count: Option<u32>,
    time: i64,
}

impl From<WireCandle> for Candle {
    fn from(wire: WireCandle) -> Self {
        Candle {
            timestamp: wire.time,
            open: wire.open,
            high: wire.high,
            low: wire.low,
            close: wire.close,
            volume: wire.volume,
            quote_volume: wire.quote_volume,
            trade_count: wire.trade_count,
        }
    }
}

#[derive(Deserialize, Debug)]
struct WirePayload {
    oclhv: Vec<WireCandle>,
}

#[derive(Deserialize, Debug)]
struct WireErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct WireEnvelope {
    success: Option<bool>,
    data: Option<WirePayload>,
    error: Option<WireErrorBody>,
}

// ==================== Client ====================

pub struct UpstreamClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(base_url: &str, timeout: Duration) -> FeedResult<Self> {
        if timeout.is_zero() {
            return Err(FeedError::Config(
                "request timeout must be greater than zero".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Map a transport-level failure onto the error taxonomy
    fn map_transport_error(err: reqwest::Error) -> FeedError {
        if err.is_timeout() {
            FeedError::Network(format!("request timed out: {}", err))
        } else if err.is_connect() {
            FeedError::Network(format!("connection failed: {}", err))
        } else {
            FeedError::Network(format!("request failed: {}", err))
        }
    }

    /// Map a non-success HTTP status onto the error taxonomy
    fn map_status_error(status: StatusCode, retry_after: Option<u64>, body: String) -> FeedError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            FeedError::RateLimited {
                retry_after_ms: retry_after.map(|secs| secs * 1000),
            }
        } else if status.is_server_error() {
            FeedError::ServerError {
                status: status.as_u16(),
                message: body,
            }
        } else {
            FeedError::ClientError {
                status: status.as_u16(),
                message: body,
            }
        }
    }

    /// Extract candles from either the wrapped or the bare payload shape
    fn parse_payload(raw: &str) -> FeedResult<Vec<Candle>> {
        // Bare payload first: `{ "oclhv": [...] }`
        if let Ok(payload) = serde_json::from_str::<WirePayload>(raw) {
            return Ok(payload.oclhv.into_iter().map(Candle::from).collect());
        }

        let envelope: WireEnvelope = serde_json::from_str(raw)?;

        if envelope.success == Some(false) {
            let (code, message) = envelope
                .error
                .map(|e| (e.code.unwrap_or(0), e.message.unwrap_or_default()))
                .unwrap_or((0, "unknown upstream error".to_string()));
            return Err(FeedError::ClientError {
                status: code as u16,
                message,
            });
        }

        match envelope.data {
            Some(payload) => Ok(payload.oclhv.into_iter().map(Candle::from).collect()),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl CandleSource for UpstreamClient {
    async fn fetch_candles(
        &self,
        token: &str,
        interval: Timeframe,
        time_from: i64,
        time_to: i64,
        limit: usize,
    ) -> FeedResult<Vec<Candle>> {
        let url = format!("{}/ohlcv", self.base_url);
        let limit = limit.min(MAX_CANDLES_PER_REQUEST);

        logger::debug(
            LogTag::Fetch,
            &format!(
                "GET {} token={} interval={} from={} to={} limit={}",
                url,
                token,
                interval.to_api_param(),
                time_from,
                time_to,
                limit
            ),
        );

        let start = Instant::now();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("address", token),
                ("interval", interval.to_api_param()),
                ("time_from", &time_from.to_string()),
                ("time_to", &time_to.to_string()),
                ("limit", &limit.to_string()),
            ])
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let body = response
            .text()
            .await
            .map_err(Self::map_transport_error)?;

        if !status.is_success() {
            return Err(Self::map_status_error(status, retry_after, body));
        }

        let candles = Self::parse_payload(&body)?;

        logger::debug(
            LogTag::Fetch,
            &format!(
                "received {} candles in {} ms",
                candles.len(),
                start.elapsed().as_millis()
            ),
        );

        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_payload() {
        let raw = r#"{"oclhv":[{"open":1.0,"close":2.0,"low":0.5,"high":2.5,"volume":100.0,"time":1700000000}]}"#;
        let candles = UpstreamClient::parse_payload(raw).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].timestamp, 1_700_000_000);
        assert_eq!(candles[0].high, 2.5);
        assert_eq!(candles[0].quote_volume, None);
    }

    #[test]
    fn parses_wrapped_payload() {
        let raw = r#"{"success":true,"data":{"oclhv":[{"open":1.0,"close":1.0,"low":1.0,"high":1.0,"volume":5.0,"time":1700000060,"trade_count":7}]}}"#;
        let candles = UpstreamClient::parse_payload(raw).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].trade_count, Some(7));
    }

    #[test]
    fn error_envelope_becomes_client_error() {
        let raw = r#"{"success":false,"error":{"code":400,"message":"bad address"}}"#;
        let err = UpstreamClient::parse_payload(raw).unwrap_err();
        match err {
            FeedError::ClientError { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad address");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn wrapped_success_without_data_is_empty() {
        let raw = r#"{"success":true}"#;
        let candles = UpstreamClient::parse_payload(raw).unwrap();
        assert!(candles.is_empty());
    }

    #[test]
    fn status_mapping() {
        let err = UpstreamClient::map_status_error(
            StatusCode::TOO_MANY_REQUESTS,
            Some(3),
            String::new(),
        );
        assert!(matches!(
            err,
            FeedError::RateLimited {
                retry_after_ms: Some(3000)
            }
        ));

        let err =
            UpstreamClient::map_status_error(StatusCode::BAD_GATEWAY, None, "oops".to_string());
        assert!(matches!(err, FeedError::ServerError { status: 502, .. }));

        let err =
            UpstreamClient::map_status_error(StatusCode::NOT_FOUND, None, String::new());
        assert!(matches!(err, FeedError::ClientError { status: 404, .. }));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(UpstreamClient::new("http://localhost", Duration::ZERO).is_err());
    }
}
