use chrono::Utc;
use color_eyre::eyre::{Result, WrapErr};
use signalbot::config::Config;
use signalbot::logging::init_tracing;
use signalbot::market::{BinanceFeed, KlineCache};
use signalbot::utils::date_to_timestamp::window_start;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = dotenv::dotenv() {
        eprintln!("No .env file loaded ({}), using environment only", e);
    }
    let config = Config::load();
    let _guard = init_tracing(&config.log_dir, "collector")?;

    let feed = BinanceFeed::new()?;
    let cache = KlineCache::new(&config.data_dir)?;
    let start = window_start(&config.backtest_start_date, config.backtest_lookback_days, Utc::now())
        .wrap_err("Invalid BACKTEST_START_DATE")?;

    let mut failures = 0;
    for symbol in config.symbols() {
        for timeframe in config.timeframes() {
            match cache.collect_symbol(&feed, &symbol, timeframe, start).await {
                Ok(rows) => info!("{} {}: {} new klines", symbol, timeframe, rows),
                Err(e) => {
                    error!("Data collection failed for {} {}: {:#}", symbol, timeframe, e);
                    failures += 1;
                }
            }
        }
    }

    info!("Data collection statistics:");
    for symbol in config.symbols() {
        for timeframe in config.timeframes() {
            match cache.stats(&symbol, timeframe).await {
                Ok(stats) => {
                    let first = stats.first.map(|t| t.to_rfc3339()).unwrap_or_else(|| "N/A".to_string());
                    let last = stats.last.map(|t| t.to_rfc3339()).unwrap_or_else(|| "N/A".to_string());
                    info!("  {} {}: {} records, from {} to {}", symbol, timeframe, stats.rows, first, last);
                }
                Err(e) => warn!("Failed to get statistics for {} {}: {:#}", symbol, timeframe, e),
            }
        }
    }

    if failures > 0 {
        warn!("Data collector finished with {} failed pairs", failures);
    } else {
        info!("Data collector finished");
    }
    Ok(())
}
