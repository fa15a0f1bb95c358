use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::eyre::{Result, WrapErr, eyre};
use reqwest::Client;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, instrument, trace};

use super::{Candle, MarketDataSource, Timeframe};

const BASE_URL: &str = "https://api.binance.com";
/// Maximum rows Binance returns per klines request.
const PAGE_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
struct BinanceKline {
    #[serde(rename = "0")]
    open_time: i64,
    #[serde(rename = "1")]
    open: String,
    #[serde(rename = "2")]
    high: String,
    #[serde(rename = "3")]
    low: String,
    #[serde(rename = "4")]
    close: String,
    #[serde(rename = "5")]
    volume: String,
    #[serde(rename = "6")]
    close_time: i64,
    #[serde(rename = "7")]
    _quote_asset_volume: String,
    #[serde(rename = "8")]
    _number_of_trades: i64,
    #[serde(rename = "9")]
    _taker_buy_base_asset_volume: String,
    #[serde(rename = "10")]
    _taker_buy_quote_asset_volume: String,
    #[serde(rename = "11")]
    _ignore: String,
}

impl BinanceKline {
    fn into_candle(self) -> Result<Candle> {
        Ok(Candle {
            open_time: self.open_time,
            close_time: self.close_time,
            open: self.open.parse().wrap_err("bad open price")?,
            high: self.high.parse().wrap_err("bad high price")?,
            low: self.low.parse().wrap_err("bad low price")?,
            close: self.close.parse().wrap_err("bad close price")?,
            volume: self.volume.parse().wrap_err("bad volume")?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

/// Map a CFD-style symbol (BTCUSD) to the Binance spot pair (BTCUSDT).
pub fn binance_symbol(symbol: &str) -> String {
    let symbol = symbol.to_uppercase().replace(['_', '/'], "");
    if symbol.ends_with("USDT") || symbol.ends_with("USDC") {
        symbol
    } else if symbol.ends_with("USD") {
        format!("{}T", symbol)
    } else {
        symbol
    }
}

#[derive(Debug, Clone)]
pub struct BinanceFeed {
    client: Client,
    base_url: String,
}

impl BinanceFeed {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .wrap_err("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn request_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let pair = binance_symbol(symbol);
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            pair,
            timeframe.binance_interval(),
            limit.min(PAGE_LIMIT)
        );
        if let Some(start) = start_time {
            url.push_str(&format!("&startTime={}", start));
        }
        if let Some(end) = end_time {
            url.push_str(&format!("&endTime={}", end));
        }
        trace!("Requesting: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .wrap_err_with(|| format!("Failed to send request to Binance API for {}", pair))?;

        if !response.status().is_success() {
            return Err(eyre!(
                "Binance API returned error status {} for symbol {}",
                response.status(),
                pair
            ));
        }

        let klines: Vec<BinanceKline> = response
            .json()
            .await
            .wrap_err_with(|| format!("Failed to parse JSON response for {}", pair))?;

        klines.into_iter().map(BinanceKline::into_candle).collect()
    }

    /// Page through klines between `start_time` and `end_time` (ms).
    #[instrument(skip(self), level = "debug")]
    pub async fn fetch_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let start_str = start_time
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "recent data".to_string());
        debug!("Fetching {} {} klines from {}", symbol, timeframe, start_str);

        let mut all = Vec::new();
        let mut current_start = start_time;
        loop {
            // stay well under the public rate limit
            sleep(Duration::from_millis(100)).await;

            let batch = self
                .request_klines(symbol, timeframe, PAGE_LIMIT, current_start, end_time)
                .await?;
            let batch_len = batch.len();
            if let Some(last) = batch.last() {
                current_start = Some(last.close_time + 1);
            }
            all.extend(batch);

            if batch_len < PAGE_LIMIT {
                break;
            }
            if let (Some(end), Some(start)) = (end_time, current_start) {
                if start >= end {
                    break;
                }
            }
        }

        debug!("Fetched {} klines for {}", all.len(), symbol);
        Ok(all)
    }
}

#[async_trait]
impl MarketDataSource for BinanceFeed {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        self.request_klines(symbol, timeframe, limit, None, None).await
    }

    async fn current_price(&self, symbol: &str) -> Result<f64> {
        let pair = binance_symbol(symbol);
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, pair);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .wrap_err_with(|| format!("Failed to fetch Binance price for {}", pair))?;
        if !response.status().is_success() {
            return Err(eyre!("Binance ticker returned {} for {}", response.status(), pair));
        }
        let ticker: TickerPrice = response
            .json()
            .await
            .wrap_err_with(|| format!("Failed to parse Binance ticker for {}", pair))?;
        ticker
            .price
            .parse()
            .wrap_err_with(|| format!("Invalid price '{}' for {}", ticker.price, pair))
    }
}
