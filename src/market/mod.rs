pub mod binance;
pub mod cache;
pub mod mock;
pub mod yahoo;

pub use binance::BinanceFeed;
pub use cache::KlineCache;
pub use mock::MockFeed;
pub use yahoo::YahooFeed;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::Section;
use color_eyre::eyre::{Result, eyre};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;

/// One OHLCV bar. Times are Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 8] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    pub fn millis(&self) -> i64 {
        self.minutes() * 60_000
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M3 => "M3",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
        }
    }

    pub fn binance_interval(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Widening factor for SL/TP distances on slower charts.
    pub fn tp_sl_factor(&self) -> f64 {
        match self {
            Timeframe::M3 => 1.0,
            Timeframe::M5 => 2.0,
            Timeframe::M15 => 3.0,
            Timeframe::M30 => 4.0,
            Timeframe::H1 => 5.0,
            Timeframe::H4 => 6.0,
            Timeframe::M1 | Timeframe::D1 => 1.0,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

static MT_STYLE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(r"^([MHD])(\d+)$"));
static INTERVAL_STYLE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(r"^(\d+)([MHD])$"));

impl FromStr for Timeframe {
    type Err = color_eyre::Report;

    /// Accepts both "M15"/"H1" and "15m"/"1h".
    fn from_str(s: &str) -> Result<Self> {
        let value = s.trim().to_uppercase();
        let mt_style = MT_STYLE.as_ref().map_err(|e| eyre!("bad timeframe pattern: {}", e))?;
        let interval_style = INTERVAL_STYLE.as_ref().map_err(|e| eyre!("bad timeframe pattern: {}", e))?;
        let (unit, amount) = if let Some(caps) = mt_style.captures(&value) {
            (caps[1].to_string(), caps[2].parse::<i64>()?)
        } else if let Some(caps) = interval_style.captures(&value) {
            (caps[2].to_string(), caps[1].parse::<i64>()?)
        } else {
            return Err(eyre!("unrecognised timeframe '{}'", s));
        };
        let minutes = match unit.as_str() {
            "M" => amount,
            "H" => amount * 60,
            "D" => amount * 1440,
            _ => return Err(eyre!("unrecognised timeframe unit in '{}'", s)),
        };
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.minutes() == minutes)
            .ok_or_else(|| eyre!("unsupported timeframe '{}'", s))
    }
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Most recent `limit` candles, oldest first.
    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>>;

    async fn current_price(&self, symbol: &str) -> Result<f64>;
}

/// Fetch candles, retrying while the source returns fewer than `min_bars`.
pub async fn fetch_with_retry(
    source: &dyn MarketDataSource,
    symbol: &str,
    timeframe: Timeframe,
    limit: usize,
    min_bars: usize,
    retries: usize,
    delay: Duration,
) -> Result<Vec<Candle>> {
    let mut attempt = 0;
    loop {
        let outcome = source.fetch_candles(symbol, timeframe, limit).await;
        let reason = match outcome {
            Ok(candles) if candles.len() >= min_bars => {
                debug!(
                    "{} data: {} {} - {} bars (latest: {:.5})",
                    source.name(),
                    symbol,
                    timeframe,
                    candles.len(),
                    candles.last().map(|c| c.close).unwrap_or_default()
                );
                return Ok(candles);
            }
            Ok(candles) => format!("only {} bars (need {})", candles.len(), min_bars),
            Err(e) => format!("{:#}", e),
        };

        if attempt >= retries {
            return Err(eyre!(
                "no usable {} data for {} {} after {} attempts: {}",
                source.name(),
                symbol,
                timeframe,
                attempt + 1,
                reason
            ));
        }
        attempt += 1;
        warn!("{} data retry {} for {} {}: {}", source.name(), attempt, symbol, timeframe, reason);
        tokio::time::sleep(delay).await;
    }
}

pub fn build_source(config: &Config) -> Result<Arc<dyn MarketDataSource>> {
    match config.data_source.to_lowercase().as_str() {
        "binance" => Ok(Arc::new(BinanceFeed::new()?)),
        "yahoo" => Ok(Arc::new(YahooFeed::new()?)),
        "mock" => Ok(Arc::new(match config.mock_seed {
            Some(seed) => MockFeed::seeded(seed),
            None => MockFeed::new(),
        })),
        other => Err(eyre!("unknown data source '{}'", other))
            .with_suggestion(|| "Set DATA_SOURCE to one of: binance, yahoo, mock"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!("M15".parse::<Timeframe>().unwrap(), Timeframe::M15);
        assert_eq!("m3".parse::<Timeframe>().unwrap(), Timeframe::M3);
        assert_eq!("15m".parse::<Timeframe>().unwrap(), Timeframe::M15);
        assert_eq!("1h".parse::<Timeframe>().unwrap(), Timeframe::H1);
        assert_eq!("H4".parse::<Timeframe>().unwrap(), Timeframe::H4);
        assert_eq!("1d".parse::<Timeframe>().unwrap(), Timeframe::D1);
        assert_eq!("60m".parse::<Timeframe>().unwrap(), Timeframe::H1);
        assert!("7m".parse::<Timeframe>().is_err());
        assert!("weekly".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_timeframe_labels() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.label().parse::<Timeframe>().unwrap(), tf);
            assert_eq!(tf.binance_interval().parse::<Timeframe>().unwrap(), tf);
        }
        assert_eq!(Timeframe::M5.to_string(), "M5");
        assert_eq!(Timeframe::H1.millis(), 3_600_000);
    }

    #[test]
    fn test_build_source_rejects_unknown() {
        let config = Config {
            data_source: "mt5".into(),
            ..Default::default()
        };
        assert!(build_source(&config).is_err());

        let config = Config {
            data_source: "mock".into(),
            mock_seed: Some(7),
            ..Default::default()
        };
        let source = build_source(&config).unwrap();
        assert_eq!(source.name(), "mock");
    }

    struct ShortThenFull {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl MarketDataSource for ShortThenFull {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn fetch_candles(&self, _symbol: &str, _tf: Timeframe, limit: usize) -> Result<Vec<Candle>> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            match call {
                0 => Err(eyre!("connection reset")),
                1 => Ok(vec![Candle::default(); 3]),
                _ => Ok(vec![Candle::default(); limit]),
            }
        }

        async fn current_price(&self, _symbol: &str) -> Result<f64> {
            Ok(1.0)
        }
    }

    #[tokio::test]
    async fn test_fetch_with_retry_recovers() {
        let source = ShortThenFull { calls: Default::default() };
        let candles = fetch_with_retry(&source, "BTCUSD", Timeframe::M5, 40, 30, 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(candles.len(), 40);
    }

    #[tokio::test]
    async fn test_fetch_with_retry_gives_up() {
        let source = ShortThenFull { calls: Default::default() };
        let result = fetch_with_retry(&source, "BTCUSD", Timeframe::M5, 40, 30, 1, Duration::from_millis(1)).await;
        assert!(result.is_err());
    }
}
