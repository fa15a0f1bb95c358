use color_eyre::Section;
use color_eyre::eyre::{Result, eyre};
use signalbot::backtest::Backtester;
use signalbot::config::Config;
use signalbot::logging::init_tracing;
use signalbot::market::KlineCache;
use signalbot::signal::SignalGenerator;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = dotenv::dotenv() {
        eprintln!("No .env file loaded ({}), using environment only", e);
    }
    let config = Config::load();
    let _guard = init_tracing(&config.log_dir, "backtest")?;

    let cache = KlineCache::new(&config.data_dir)?;
    let backtester = Backtester::new(SignalGenerator::default(), config.backtest_max_hold_bars);

    let mut reports = Vec::new();
    for symbol in config.symbols() {
        for timeframe in config.timeframes() {
            let candles = match cache.load(&symbol, timeframe).await {
                Ok(candles) => candles,
                Err(e) => {
                    warn!("Skipping {} {}: {:#}", symbol, timeframe, e);
                    continue;
                }
            };
            reports.push(backtester.run(&symbol, timeframe, &candles));
        }
    }

    if reports.is_empty() {
        return Err(eyre!("no cached klines to backtest"))
            .with_suggestion(|| "Run the collector binary first to fill the data directory");
    }

    println!(
        "{:<10} {:<5} {:>7} {:>7} {:>5} {:>5} {:>5} {:>8} {:>10} {:>8} {:>8}",
        "SYMBOL", "TF", "BARS", "TRADES", "WIN", "LOSS", "T/O", "WIN%", "RETURN%", "PF", "MAXDD%"
    );
    for r in &reports {
        println!(
            "{:<10} {:<5} {:>7} {:>7} {:>5} {:>5} {:>5} {:>8.2} {:>10.2} {:>8.2} {:>8.2}",
            r.symbol,
            r.timeframe.map(|t| t.label()).unwrap_or("-"),
            r.bars,
            r.trades,
            r.wins,
            r.losses,
            r.timeouts,
            r.win_rate,
            r.total_return_pct,
            r.profit_factor,
            r.max_drawdown_pct
        );
    }
    info!("Backtest finished for {} series", reports.len());
    Ok(())
}
