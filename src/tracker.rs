use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::signal::{Side, Signal, SignalStatus};
use crate::utils::to_precision::round_to;

/// Closed signals kept for statistics.
pub const HISTORY_LIMIT: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub status: SignalStatus,
    pub price: f64,
    pub pnl_pct: f64,
    pub closed: bool,
    pub signal: Signal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Performance {
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub expired: usize,
    pub win_rate: f64,
    pub total_pnl_pct: f64,
    pub avg_pnl_pct: f64,
}

/// Open and closed signals, advanced by live prices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalTracker {
    #[serde(default)]
    open_signals: Vec<Signal>,
    #[serde(default)]
    closed_signals: Vec<Signal>,
}

impl SignalTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) -> &[Signal] {
        &self.open_signals
    }

    /// Oldest first.
    pub fn closed(&self) -> &[Signal] {
        &self.closed_signals
    }

    pub fn add(&mut self, signal: Signal) {
        self.open_signals.push(signal);
    }

    /// Exit price for a signal whose stop is touched after it already banked
    /// one or more targets: the highest target reached.
    fn locked_exit(signal: &Signal) -> Option<f64> {
        signal.tp(signal.status.tp_level())
    }

    /// Check every open signal for `symbol` against `price`.
    ///
    /// The stop stays live until TP3. A stop after TP1/TP2 closes the signal
    /// without downgrading its status.
    pub fn update(&mut self, symbol: &str, price: f64, at: DateTime<Utc>) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        let mut still_open = Vec::with_capacity(self.open_signals.len());

        for mut signal in std::mem::take(&mut self.open_signals) {
            if signal.symbol != symbol || !signal.status.is_active() {
                still_open.push(signal);
                continue;
            }

            let stopped = match signal.side {
                Side::Buy => price <= signal.stop_loss,
                Side::Sell => price >= signal.stop_loss,
            };
            let reached = (1..=3)
                .rev()
                .find(|&k| {
                    signal.tp(k).is_some_and(|tp| match signal.side {
                        Side::Buy => price >= tp,
                        Side::Sell => price <= tp,
                    })
                })
                .unwrap_or(0);

            if stopped {
                let exit = match signal.status {
                    SignalStatus::Open => {
                        signal.status = SignalStatus::SlHit;
                        price
                    }
                    _ => Self::locked_exit(&signal).unwrap_or(price),
                };
                outcomes.push(self.close(signal, exit, at));
            } else if reached > signal.status.tp_level() {
                signal.status = SignalStatus::from_tp_level(reached);
                signal.exit_price = Some(price);
                info!("{} {} {} at {:.5}", signal.symbol, signal.side, signal.status, price);
                if reached >= 3 {
                    outcomes.push(self.close(signal, price, at));
                } else {
                    outcomes.push(Outcome {
                        status: signal.status,
                        price,
                        pnl_pct: signal.pnl_pct(price),
                        closed: false,
                        signal: signal.clone(),
                    });
                    still_open.push(signal);
                }
            } else {
                still_open.push(signal);
            }
        }

        self.open_signals = still_open;
        outcomes
    }

    fn close(&mut self, mut signal: Signal, exit: f64, at: DateTime<Utc>) -> Outcome {
        signal.exit_price = Some(exit);
        signal.closed_at = Some(at);
        let pnl_pct = signal.pnl_pct(exit);
        info!(
            "Closed {} {} {}: {} at {:.5} ({:+.2}%)",
            signal.symbol, signal.timeframe, signal.side, signal.status, exit, pnl_pct
        );
        let outcome = Outcome {
            status: signal.status,
            price: exit,
            pnl_pct,
            closed: true,
            signal: signal.clone(),
        };
        self.push_closed(signal);
        outcome
    }

    fn push_closed(&mut self, signal: Signal) {
        self.closed_signals.push(signal);
        if self.closed_signals.len() > HISTORY_LIMIT {
            let excess = self.closed_signals.len() - HISTORY_LIMIT;
            self.closed_signals.drain(..excess);
        }
    }

    /// Close signals older than `max_age`. Untouched ones become `Expired`,
    /// ones that already hit a target keep their status.
    pub fn expire(&mut self, max_age: Duration, at: DateTime<Utc>) -> Vec<Outcome> {
        let (stale, fresh): (Vec<Signal>, Vec<Signal>) = std::mem::take(&mut self.open_signals)
            .into_iter()
            .partition(|s| at - s.generated_at >= max_age);
        self.open_signals = fresh;

        stale
            .into_iter()
            .map(|mut signal| {
                let exit = match signal.status {
                    SignalStatus::Open => {
                        signal.status = SignalStatus::Expired;
                        signal.entry
                    }
                    _ => Self::locked_exit(&signal).unwrap_or(signal.entry),
                };
                self.close(signal, exit, at)
            })
            .collect()
    }

    pub fn performance(&self) -> Performance {
        Self::summarize(&self.closed_signals)
    }

    /// Summed P&L of signals closed at or after `since`.
    pub fn pnl_pct_since(&self, since: DateTime<Utc>) -> f64 {
        self.closed_signals
            .iter()
            .filter(|s| s.closed_at.is_some_and(|t| t >= since))
            .filter_map(|s| s.exit_price.map(|exit| s.pnl_pct(exit)))
            .sum()
    }

    pub fn summarize(closed: &[Signal]) -> Performance {
        if closed.is_empty() {
            return Performance::default();
        }
        let total = closed.len();
        let wins = closed.iter().filter(|s| s.status.is_win()).count();
        let losses = closed.iter().filter(|s| s.status == SignalStatus::SlHit).count();
        let expired = closed.iter().filter(|s| s.status == SignalStatus::Expired).count();
        let total_pnl: f64 = closed
            .iter()
            .filter_map(|s| s.exit_price.map(|exit| s.pnl_pct(exit)))
            .sum();

        Performance {
            total,
            wins,
            losses,
            expired,
            win_rate: round_to(wins as f64 / total as f64 * 100.0, 2),
            total_pnl_pct: round_to(total_pnl, 4),
            avg_pnl_pct: round_to(total_pnl / total as f64, 4),
        }
    }
}
