use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use color_eyre::eyre::{Result, WrapErr, eyre};
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::{BinanceFeed, Candle, Timeframe};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub rows: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

/// Arrow IPC kline store, one file per symbol and timeframe.
#[derive(Debug, Clone)]
pub struct KlineCache {
    data_dir: PathBuf,
}

impl KlineCache {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        if !data_dir.exists() {
            fs::create_dir_all(&data_dir)
                .wrap_err_with(|| format!("Failed to create data directory {}", data_dir.display()))?;
        }
        Ok(Self { data_dir })
    }

    pub fn file_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.data_dir.join(format!(
            "{}_{}.arrow",
            symbol.to_lowercase(),
            timeframe.label().to_lowercase()
        ))
    }

    fn scan(path: &Path) -> Result<LazyFrame> {
        LazyFrame::scan_ipc(PlPath::Local(Arc::from(path)), Default::default())
            .wrap_err_with(|| format!("Failed to scan IPC file {}", path.display()))
    }

    pub async fn last_close_time(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<i64>> {
        let path = self.file_path(symbol, timeframe);
        if !path.exists() {
            return Ok(None);
        }

        let df = tokio::task::spawn_blocking(move || {
            Self::scan(&path)?
                .select([col("close_time")])
                .sort(["close_time"], SortMultipleOptions::default())
                .tail(1)
                .collect()
                .wrap_err("Failed to collect DataFrame")
        })
        .await
        .wrap_err("Failed to execute blocking task")??;

        if df.height() == 0 {
            return Ok(None);
        }
        let last = df
            .column("close_time")
            .wrap_err("Failed to get close_time column")?
            .i64()
            .wrap_err("Failed to cast close_time to i64")?
            .get(0);
        Ok(last)
    }

    pub fn save(&self, symbol: &str, timeframe: Timeframe, candles: &[Candle]) -> Result<()> {
        let mut df = candles_to_dataframe(candles)?;
        self.write(&mut df, symbol, timeframe)
    }

    fn write(&self, df: &mut DataFrame, symbol: &str, timeframe: Timeframe) -> Result<()> {
        let path = self.file_path(symbol, timeframe);
        let mut file = fs::File::create(&path)
            .wrap_err_with(|| format!("Failed to create Arrow file: {}", path.display()))?;
        IpcWriter::new(&mut file)
            .finish(df)
            .wrap_err("Failed to write DataFrame to Arrow file")?;
        debug!("Saved {} rows to {}", df.height(), path.display());
        Ok(())
    }

    /// Merge `candles` into the stored series. A bar whose `open_time` is
    /// already stored replaces the stored row.
    pub async fn append(&self, symbol: &str, timeframe: Timeframe, candles: &[Candle]) -> Result<()> {
        let path = self.file_path(symbol, timeframe);
        if !path.exists() {
            return self.save(symbol, timeframe, candles);
        }

        let new_df = candles_to_dataframe(candles)?;
        let mut combined = tokio::task::spawn_blocking(move || {
            let existing = Self::scan(&path)?
                .collect()
                .wrap_err("Failed to collect existing DataFrame")?;
            concat([existing.lazy(), new_df.lazy()], Default::default())
                .wrap_err("Failed to concatenate DataFrames")?
                .unique_stable(Some(cols(["open_time"])), UniqueKeepStrategy::Last)
                .sort(["open_time"], SortMultipleOptions::default())
                .collect()
                .wrap_err("Failed to collect combined DataFrame")
        })
        .await
        .wrap_err("Failed to execute blocking task")??;

        self.write(&mut combined, symbol, timeframe)
    }

    /// Cached candles, oldest first.
    #[instrument(skip(self), level = "debug")]
    pub async fn load(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>> {
        let path = self.file_path(symbol, timeframe);
        if !path.exists() {
            return Err(eyre!("No cached klines for {} {} at {}", symbol, timeframe, path.display()));
        }

        let df = tokio::task::spawn_blocking(move || {
            Self::scan(&path)?
                .sort(["open_time"], SortMultipleOptions::default())
                .collect()
                .wrap_err("Failed to collect DataFrame")
        })
        .await
        .wrap_err("Failed to execute blocking task")?
        .wrap_err_with(|| format!("Failed to load klines for {} {}", symbol, timeframe))?;

        debug!("Loaded {} klines for {} {}", df.height(), symbol, timeframe);
        dataframe_to_candles(&df)
    }

    pub async fn stats(&self, symbol: &str, timeframe: Timeframe) -> Result<CacheStats> {
        let path = self.file_path(symbol, timeframe);
        if !path.exists() {
            return Ok(CacheStats {
                rows: 0,
                first: None,
                last: None,
            });
        }

        let df = tokio::task::spawn_blocking(move || {
            Self::scan(&path)?
                .select([
                    col("open_time").min().alias("min_time"),
                    col("open_time").max().alias("max_time"),
                    col("open_time").count().alias("count"),
                ])
                .collect()
                .wrap_err("Failed to collect statistics DataFrame")
        })
        .await
        .wrap_err("Failed to execute blocking task")??;

        let rows = df
            .column("count")
            .wrap_err("Failed to get count column")?
            .u32()
            .wrap_err("Failed to convert count to u32")?
            .get(0)
            .unwrap_or(0) as usize;
        let time_at = |name: &str| -> Result<Option<DateTime<Utc>>> {
            Ok(int_col(&df, name)?.get(0).and_then(DateTime::<Utc>::from_timestamp_millis))
        };

        Ok(CacheStats {
            rows,
            first: time_at("min_time")?,
            last: time_at("max_time")?,
        })
    }

    /// Download candles newer than the cached ones, or everything from
    /// `initial_start` (ms) for an empty cache. Returns the number of new rows.
    #[instrument(skip(self, feed))]
    pub async fn collect_symbol(
        &self,
        feed: &BinanceFeed,
        symbol: &str,
        timeframe: Timeframe,
        initial_start: i64,
    ) -> Result<usize> {
        let last = self.last_close_time(symbol, timeframe).await?;
        let start = match last {
            Some(ts) => {
                debug!(
                    "Found cached data, last close {}",
                    DateTime::<Utc>::from_timestamp_millis(ts)
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default()
                );
                ts + 1
            }
            None => {
                info!(
                    "No cached data for {} {}, starting from {}",
                    symbol,
                    timeframe,
                    DateTime::<Utc>::from_timestamp_millis(initial_start)
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default()
                );
                initial_start
            }
        };

        let candles = feed.fetch_range(symbol, timeframe, Some(start), None).await?;
        let fetched = candles.len();
        let candles = closed_only(candles, Utc::now().timestamp_millis());
        if fetched > candles.len() {
            debug!("Skipped {} unfinished kline(s) for {} {}", fetched - candles.len(), symbol, timeframe);
        }
        if candles.is_empty() {
            info!("No new data available for {} {}", symbol, timeframe);
            return Ok(0);
        }

        if last.is_some() {
            self.append(symbol, timeframe, &candles).await?;
        } else {
            self.save(symbol, timeframe, &candles)?;
        }
        Ok(candles.len())
    }
}

/// Drop bars still forming at `now_ms`; the next run picks them up once closed.
fn closed_only(candles: Vec<Candle>, now_ms: i64) -> Vec<Candle> {
    candles.into_iter().filter(|c| c.close_time <= now_ms).collect()
}

fn candles_to_dataframe(candles: &[Candle]) -> Result<DataFrame> {
    let df = df![
        "open_time" => candles.iter().map(|c| c.open_time).collect::<Vec<i64>>(),
        "close_time" => candles.iter().map(|c| c.close_time).collect::<Vec<i64>>(),
        "open" => candles.iter().map(|c| c.open).collect::<Vec<f64>>(),
        "high" => candles.iter().map(|c| c.high).collect::<Vec<f64>>(),
        "low" => candles.iter().map(|c| c.low).collect::<Vec<f64>>(),
        "close" => candles.iter().map(|c| c.close).collect::<Vec<f64>>(),
        "volume" => candles.iter().map(|c| c.volume).collect::<Vec<f64>>(),
    ]
    .wrap_err("Failed to build kline DataFrame")?;
    Ok(df)
}

fn int_col<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Int64Chunked> {
    df.column(name)
        .wrap_err_with(|| format!("Failed to get {} column", name))?
        .i64()
        .wrap_err_with(|| format!("Failed to convert {} to i64", name))
}

fn float_col<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Float64Chunked> {
    df.column(name)
        .wrap_err_with(|| format!("Failed to get {} column", name))?
        .f64()
        .wrap_err_with(|| format!("Failed to convert {} to f64", name))
}

fn dataframe_to_candles(df: &DataFrame) -> Result<Vec<Candle>> {
    let open_times = int_col(df, "open_time")?;
    let close_times = int_col(df, "close_time")?;
    let opens = float_col(df, "open")?;
    let highs = float_col(df, "high")?;
    let lows = float_col(df, "low")?;
    let closes = float_col(df, "close")?;
    let volumes = float_col(df, "volume")?;

    Ok((0..df.height())
        .map(|i| Candle {
            open_time: open_times.get(i).unwrap_or(0),
            close_time: close_times.get(i).unwrap_or(0),
            open: opens.get(i).unwrap_or(0.0),
            high: highs.get(i).unwrap_or(0.0),
            low: lows.get(i).unwrap_or(0.0),
            close: closes.get(i).unwrap_or(0.0),
            volume: volumes.get(i).unwrap_or(0.0),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 299_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    #[tokio::test]
    async fn test_save_load_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KlineCache::new(dir.path()).unwrap();
        assert_eq!(cache.last_close_time("BTCUSD", Timeframe::M5).await.unwrap(), None);

        let first = vec![candle(0, 100.0), candle(300_000, 101.0)];
        cache.save("BTCUSD", Timeframe::M5, &first).unwrap();
        assert!(cache.file_path("BTCUSD", Timeframe::M5).ends_with("btcusd_m5.arrow"));

        // overlapping row is dropped, new row lands in order
        let more = vec![candle(600_000, 102.0), candle(300_000, 101.0)];
        cache.append("BTCUSD", Timeframe::M5, &more).await.unwrap();

        let loaded = cache.load("BTCUSD", Timeframe::M5).await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[2].close, 102.0);
        assert_eq!(
            cache.last_close_time("BTCUSD", Timeframe::M5).await.unwrap(),
            Some(600_000 + 299_999)
        );

        let stats = cache.stats("BTCUSD", Timeframe::M5).await.unwrap();
        assert_eq!(stats.rows, 3);
        assert_eq!(stats.first.map(|t| t.timestamp_millis()), Some(0));
    }

    #[tokio::test]
    async fn test_append_replaces_refetched_bar() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KlineCache::new(dir.path()).unwrap();
        cache
            .save("XAUUSD", Timeframe::M5, &[candle(0, 2000.0), candle(300_000, 2001.0)])
            .unwrap();

        // same open_time, different values
        cache
            .append("XAUUSD", Timeframe::M5, &[candle(300_000, 2005.5)])
            .await
            .unwrap();

        let loaded = cache.load("XAUUSD", Timeframe::M5).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].open_time, 300_000);
        assert_eq!(loaded[1].close, 2005.5);
    }

    #[test]
    fn test_unfinished_bar_is_dropped() {
        let candles = vec![candle(0, 100.0), candle(300_000, 101.0), candle(600_000, 102.0)];
        // second bar closes at 599_999, third is still open
        let kept = closed_only(candles, 600_100);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.last().map(|c| c.close_time), Some(599_999));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KlineCache::new(dir.path().join("nested")).unwrap();
        assert!(cache.load("XAUUSD", Timeframe::H1).await.is_err());
        assert_eq!(cache.stats("XAUUSD", Timeframe::H1).await.unwrap().rows, 0);
    }
}
