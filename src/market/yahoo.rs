use std::time::Duration;

use async_trait::async_trait;
use color_eyre::eyre::{Result, WrapErr, eyre};
use reqwest::Client;
use serde::Deserialize;
use tracing::trace;

use super::{Candle, MarketDataSource, Timeframe};

const BASE_URL: &str = "https://query1.finance.yahoo.com";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

pub fn yahoo_ticker(symbol: &str) -> String {
    let symbol = symbol.to_uppercase();
    match symbol.as_str() {
        "BTCUSD" => "BTC-USD".into(),
        "ETHUSD" => "ETH-USD".into(),
        "XAUUSD" => "GC=F".into(),
        "XAGUSD" => "SI=F".into(),
        "US30" => "^DJI".into(),
        "NAS100" => "^NDX".into(),
        s if s.len() == 6 && s.chars().all(|c| c.is_ascii_alphabetic()) => format!("{}=X", s),
        s => s.to_string(),
    }
}

/// Yahoo interval string for a timeframe; M3 and H4 have no equivalent.
pub fn yahoo_interval(timeframe: Timeframe) -> Option<&'static str> {
    match timeframe {
        Timeframe::M1 => Some("1m"),
        Timeframe::M5 => Some("5m"),
        Timeframe::M15 => Some("15m"),
        Timeframe::M30 => Some("30m"),
        Timeframe::H1 => Some("60m"),
        Timeframe::D1 => Some("1d"),
        Timeframe::M3 | Timeframe::H4 => None,
    }
}

/// Smallest Yahoo range that covers `limit` bars, assuming 24h markets.
fn range_for(timeframe: Timeframe, limit: usize) -> &'static str {
    let minutes = timeframe.minutes() * limit as i64;
    let days = minutes / 1440 + 1;
    match days {
        0..=1 => "1d",
        2..=5 => "5d",
        6..=30 => "1mo",
        31..=90 => "3mo",
        91..=365 => "1y",
        _ => "5y",
    }
}

#[derive(Debug, Clone)]
pub struct YahooFeed {
    client: Client,
    base_url: String,
}

impl YahooFeed {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Mozilla/5.0 (signalbot)")
            .build()
            .wrap_err("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn chart(&self, symbol: &str, interval: &str, range: &str) -> Result<ChartResult> {
        let ticker = yahoo_ticker(symbol);
        let url = format!("{}/v8/finance/chart/{}", self.base_url, ticker);
        trace!("Requesting: {} interval={} range={}", url, interval, range);

        let response = self
            .client
            .get(&url)
            .query(&[("interval", interval), ("range", range)])
            .send()
            .await
            .wrap_err_with(|| format!("Failed to send request to Yahoo for {}", ticker))?;
        if !response.status().is_success() {
            return Err(eyre!("Yahoo returned error status {} for {}", response.status(), ticker));
        }
        let body: ChartResponse = response
            .json()
            .await
            .wrap_err_with(|| format!("Failed to parse Yahoo chart for {}", ticker))?;
        parse_chart(body, &ticker)
    }
}

fn parse_chart(body: ChartResponse, ticker: &str) -> Result<ChartResult> {
    if let Some(err) = body.chart.error {
        return Err(eyre!("Yahoo error for {}: {} ({})", ticker, err.description, err.code));
    }
    body.chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| eyre!("Yahoo returned no chart data for {}", ticker))
}

fn chart_to_candles(result: ChartResult, timeframe: Timeframe) -> Vec<Candle> {
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let open = (*quote.open.get(i)?)?;
            let high = (*quote.high.get(i)?)?;
            let low = (*quote.low.get(i)?)?;
            let close = (*quote.close.get(i)?)?;
            let volume = quote.volume.get(i).copied().flatten().unwrap_or(0.0);
            let open_time = ts * 1000;
            Some(Candle {
                open_time,
                close_time: open_time + timeframe.millis() - 1,
                open,
                high,
                low,
                close,
                volume,
            })
        })
        .collect()
}

#[async_trait]
impl MarketDataSource for YahooFeed {
    fn name(&self) -> &str {
        "yahoo"
    }

    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        let interval = yahoo_interval(timeframe)
            .ok_or_else(|| eyre!("Yahoo does not provide {} candles", timeframe))?;
        let result = self.chart(symbol, interval, range_for(timeframe, limit)).await?;
        let candles = chart_to_candles(result, timeframe);
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn current_price(&self, symbol: &str) -> Result<f64> {
        let result = self.chart(symbol, "1m", "1d").await?;
        if let Some(price) = result.meta.regular_market_price {
            return Ok(price);
        }
        chart_to_candles(result, Timeframe::M1)
            .last()
            .map(|c| c.close)
            .ok_or_else(|| eyre!("Yahoo returned no price for {}", symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_mapping() {
        assert_eq!(yahoo_ticker("BTCUSD"), "BTC-USD");
        assert_eq!(yahoo_ticker("XAUUSD"), "GC=F");
        assert_eq!(yahoo_ticker("eurusd"), "EURUSD=X");
        assert_eq!(yahoo_ticker("US30"), "^DJI");
        assert_eq!(yahoo_ticker("AAPL"), "AAPL");
    }

    #[test]
    fn test_unsupported_intervals() {
        assert_eq!(yahoo_interval(Timeframe::M3), None);
        assert_eq!(yahoo_interval(Timeframe::H1), Some("60m"));
        assert_eq!(range_for(Timeframe::M5, 100), "1d");
        assert_eq!(range_for(Timeframe::M15, 100), "5d");
        assert_eq!(range_for(Timeframe::H1, 100), "5d");
        assert_eq!(range_for(Timeframe::D1, 100), "1y");
    }

    #[test]
    fn test_chart_parsing_skips_gaps() {
        let body = r#"{"chart":{"result":[{"meta":{"regularMarketPrice":2012.5},
            "timestamp":[1700000000,1700000300,1700000600],
            "indicators":{"quote":[{"open":[2000.0,null,2010.0],"high":[2005.0,2008.0,2015.0],
            "low":[1995.0,2001.0,2008.0],"close":[2003.0,2006.0,2012.0],"volume":[10.0,null,null]}]}}],
            "error":null}}"#;
        let parsed: ChartResponse = serde_json::from_str(body).unwrap();
        let result = parse_chart(parsed, "GC=F").unwrap();
        assert_eq!(result.meta.regular_market_price, Some(2012.5));
        let candles = chart_to_candles(result, Timeframe::M5);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].close, 2012.0);
        assert_eq!(candles[1].volume, 0.0);
        assert_eq!(candles[0].open_time, 1_700_000_000_000);
    }

    #[test]
    fn test_chart_error_is_reported() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#;
        let parsed: ChartResponse = serde_json::from_str(body).unwrap();
        assert!(parse_chart(parsed, "NOPE").is_err());
    }
}
