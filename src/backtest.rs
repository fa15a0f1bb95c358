use serde::Serialize;
use tracing::{debug, info};

use crate::market::{Candle, Timeframe};
use crate::signal::{Side, Signal, SignalGenerator};
use crate::utils::to_precision::round_to;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeResult {
    Win,
    Loss,
    Timeout,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestTrade {
    pub side: Side,
    pub entry_index: usize,
    pub exit_index: usize,
    pub entry: f64,
    pub exit: f64,
    pub result: TradeResult,
    pub return_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BacktestReport {
    pub symbol: String,
    pub timeframe: Option<Timeframe>,
    pub bars: usize,
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub timeouts: usize,
    pub win_rate: f64,
    pub total_return_pct: f64,
    pub profit_factor: f64,
    pub max_drawdown_pct: f64,
    #[serde(skip)]
    pub history: Vec<BacktestTrade>,
}

/// Replays the live generator over historical candles.
#[derive(Debug, Clone)]
pub struct Backtester {
    generator: SignalGenerator,
    max_hold_bars: usize,
}

impl Backtester {
    pub fn new(generator: SignalGenerator, max_hold_bars: usize) -> Self {
        Self {
            generator,
            max_hold_bars: max_hold_bars.max(1),
        }
    }

    /// Walk forward, opening at most one trade at a time. The generator only
    /// ever sees bars up to the decision bar.
    pub fn run(&self, symbol: &str, timeframe: Timeframe, candles: &[Candle]) -> BacktestReport {
        let warmup = self.generator.params().slow_period.max(self.generator.min_bars());
        let mut history = Vec::new();
        let mut i = warmup;

        while i < candles.len() {
            let window = &candles[..i];
            let Some(signal) = self.generator.evaluate(symbol, timeframe, window).signal else {
                i += 1;
                continue;
            };
            let trade = self.simulate(&signal, candles, i);
            debug!(
                "{} {} {:?} {:.5} -> {:.5} ({:+.2}%)",
                symbol, signal.side, trade.result, trade.entry, trade.exit, trade.return_pct
            );
            i = trade.exit_index + 1;
            history.push(trade);
        }

        let report = Self::summarize(symbol, timeframe, candles.len(), history);
        info!(
            "Backtest {} {}: {} trades, {:.1}% win rate, {:+.2}% return, {:.2}% max drawdown",
            symbol, timeframe, report.trades, report.win_rate, report.total_return_pct, report.max_drawdown_pct
        );
        report
    }

    /// Follow `signal` from bar `start`. A bar touching both levels counts as a loss.
    fn simulate(&self, signal: &Signal, candles: &[Candle], start: usize) -> BacktestTrade {
        let tp1 = signal.tp(1).unwrap_or(signal.entry);
        let end = (start + self.max_hold_bars).min(candles.len());

        for (idx, bar) in candles.iter().enumerate().take(end).skip(start) {
            let (stopped, target) = match signal.side {
                Side::Buy => (bar.low <= signal.stop_loss, bar.high >= tp1),
                Side::Sell => (bar.high >= signal.stop_loss, bar.low <= tp1),
            };
            if stopped {
                return Self::trade(signal, start, idx, signal.stop_loss, TradeResult::Loss);
            }
            if target {
                return Self::trade(signal, start, idx, tp1, TradeResult::Win);
            }
        }

        let last = end.saturating_sub(1).max(start.min(candles.len().saturating_sub(1)));
        let exit = candles.get(last).map(|c| c.close).unwrap_or(signal.entry);
        Self::trade(signal, start, last, exit, TradeResult::Timeout)
    }

    fn trade(signal: &Signal, entry_index: usize, exit_index: usize, exit: f64, result: TradeResult) -> BacktestTrade {
        BacktestTrade {
            side: signal.side,
            entry_index,
            exit_index,
            entry: signal.entry,
            exit,
            result,
            return_pct: signal.pnl_pct(exit),
        }
    }

    fn summarize(symbol: &str, timeframe: Timeframe, bars: usize, history: Vec<BacktestTrade>) -> BacktestReport {
        let trades = history.len();
        let count = |r: TradeResult| history.iter().filter(|t| t.result == r).count();
        let wins = count(TradeResult::Win);
        let losses = count(TradeResult::Loss);
        let timeouts = count(TradeResult::Timeout);

        let gross_profit: f64 = history.iter().map(|t| t.return_pct).filter(|r| *r > 0.0).sum();
        let gross_loss: f64 = history.iter().map(|t| t.return_pct).filter(|r| *r < 0.0).map(f64::abs).sum();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        // compounded equity curve, starting at 1.0
        let mut equity = 1.0_f64;
        let mut peak = 1.0_f64;
        let mut max_drawdown = 0.0_f64;
        for trade in &history {
            equity *= 1.0 + trade.return_pct / 100.0;
            peak = peak.max(equity);
            max_drawdown = max_drawdown.max((peak - equity) / peak);
        }

        BacktestReport {
            symbol: symbol.to_string(),
            timeframe: Some(timeframe),
            bars,
            trades,
            wins,
            losses,
            timeouts,
            win_rate: if trades > 0 {
                round_to(wins as f64 / trades as f64 * 100.0, 2)
            } else {
                0.0
            },
            total_return_pct: round_to((equity - 1.0) * 100.0, 4),
            profit_factor: if profit_factor.is_finite() {
                round_to(profit_factor, 2)
            } else {
                profit_factor
            },
            max_drawdown_pct: round_to(max_drawdown * 100.0, 4),
            history,
        }
    }
}
