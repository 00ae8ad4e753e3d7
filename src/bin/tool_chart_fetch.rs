//! Diagnostic tool: fetch and print chart data for a token
//!
//! Exercises the full pipeline (limiter, breaker, cache, aggregation)
//! against the live upstream and prints the resulting candles plus
//! health and request metrics.
//!
//! Usage:
//!   tool_chart_fetch <TOKEN> [--timeframes 5m,1h] [--config feed.toml] [--json]

use anyhow::{bail, Context, Result};
use clap::Parser;

use candlefeed::client::ChartClient;
use candlefeed::config::FeedConfig;
use candlefeed::ohlcv::Timeframe;

#[derive(Parser, Debug)]
#[command(name = "tool_chart_fetch")]
#[command(about = "Fetch multi-timeframe chart data for a token")]
struct Args {
    /// Token address to fetch
    token: String,

    /// Comma-separated timeframes (1m, 5m, 15m, 1h, 4h)
    #[arg(long, default_value = "5m,1h")]
    timeframes: String,

    /// Optional TOML config file; env overrides still apply
    #[arg(long)]
    config: Option<String>,

    /// Emit candles as JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Fetch twice to show cache behavior
    #[arg(long)]
    repeat: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let timeframes = parse_timeframes(&args.timeframes)?;

    let config = match &args.config {
        Some(path) => FeedConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path))?,
        None => FeedConfig::from_env().context("loading config from environment")?,
    };

    let client = ChartClient::new(config).context("building chart client")?;

    let started = std::time::Instant::now();
    let chart = client
        .get_multi_timeframe_chart(&args.token, &timeframes)
        .await
        .with_context(|| format!("fetching chart data for {}", args.token))?;
    let first_elapsed = started.elapsed();

    for &tf in &timeframes {
        let Some(candles) = chart.charts.get(&tf) else {
            println!("== {} == (no data)", tf);
            continue;
        };

        println!("== {} == {} candles", tf, candles.len());
        if args.json {
            println!("{}", serde_json::to_string_pretty(candles)?);
        } else {
            for candle in candles.iter().rev().take(10).rev() {
                println!(
                    "  {:>12}  o={:<12} h={:<12} l={:<12} c={:<12} v={}",
                    candle.timestamp,
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume
                );
            }
            if candles.len() > 10 {
                println!("  ... ({} earlier candles omitted)", candles.len() - 10);
            }
        }
    }

    if !chart.warnings.is_empty() {
        println!("\nwarnings:");
        for warning in &chart.warnings {
            println!("  - {}", warning);
        }
    }
    for (tf, error) in &chart.errors {
        println!("error [{}]: {}", tf, error);
    }

    if args.repeat {
        let started = std::time::Instant::now();
        let second = client
            .get_multi_timeframe_chart(&args.token, &timeframes)
            .await?;
        println!(
            "\nrepeat fetch: {} timeframes in {:?} (first took {:?})",
            second.charts.len(),
            started.elapsed(),
            first_elapsed
        );
    }

    let health = client.health().await;
    let metrics = client.metrics().await;
    println!(
        "\nhealth: breaker={} cache_hit_rate={:.2} queue_depth={}",
        health.breaker_phase, health.cache_hit_rate, health.queue_depth
    );
    println!(
        "requests: total={} ok={} failed={} rate_limited={} p50={}ms p95={}ms",
        metrics.requests.total,
        metrics.requests.successful,
        metrics.requests.failed,
        metrics.requests.rate_limited,
        metrics.requests.latency_p50_ms,
        metrics.requests.latency_p95_ms
    );

    Ok(())
}

fn parse_timeframes(raw: &str) -> Result<Vec<Timeframe>> {
    let mut timeframes = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match Timeframe::parse(part) {
            Some(tf) => timeframes.push(tf),
            None => bail!("unknown timeframe '{}', expected one of 1m/5m/15m/1h/4h", part),
        }
    }
    if timeframes.is_empty() {
        bail!("no timeframes given");
    }
    Ok(timeframes)
}
