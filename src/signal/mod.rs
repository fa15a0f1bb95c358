pub mod generator;
pub mod levels;

pub use generator::{Evaluation, GeneratorParams, SignalGenerator};
pub use levels::{Levels, TP_MULTIPLIERS, calculate_levels};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::indicators::{FairValueGap, Sweep};
use crate::market::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("BUY"),
            Side::Sell => f.write_str("SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Open,
    Tp1Hit,
    Tp2Hit,
    Tp3Hit,
    SlHit,
    Expired,
}

impl SignalStatus {
    /// Still being tracked against the market.
    pub fn is_active(&self) -> bool {
        matches!(self, SignalStatus::Open | SignalStatus::Tp1Hit | SignalStatus::Tp2Hit)
    }

    pub fn is_win(&self) -> bool {
        matches!(self, SignalStatus::Tp1Hit | SignalStatus::Tp2Hit | SignalStatus::Tp3Hit)
    }

    /// Number of take-profit levels reached.
    pub fn tp_level(&self) -> usize {
        match self {
            SignalStatus::Tp1Hit => 1,
            SignalStatus::Tp2Hit => 2,
            SignalStatus::Tp3Hit => 3,
            _ => 0,
        }
    }

    pub fn from_tp_level(level: usize) -> Self {
        match level {
            0 => SignalStatus::Open,
            1 => SignalStatus::Tp1Hit,
            2 => SignalStatus::Tp2Hit,
            _ => SignalStatus::Tp3Hit,
        }
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SignalStatus::Open => "OPEN",
            SignalStatus::Tp1Hit => "TP1 HIT",
            SignalStatus::Tp2Hit => "TP2 HIT",
            SignalStatus::Tp3Hit => "TP3 HIT",
            SignalStatus::SlHit => "SL HIT",
            SignalStatus::Expired => "EXPIRED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub side: Side,
    pub trend: Trend,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profits: Vec<f64>,
    pub atr: f64,
    pub risk: f64,
    pub rr_ratio: f64,
    pub confidence: f64,
    pub support: f64,
    pub resistance: f64,
    #[serde(default)]
    pub fvg: Vec<FairValueGap>,
    pub sweep: Option<Sweep>,
    pub equilibrium: Option<(f64, f64)>,
    pub position_size: Option<f64>,
    pub session_score: Option<f64>,
    /// Estimated chance of reaching TP1, percent.
    pub tp_probability: Option<f64>,
    /// Probability-weighted TP1 reward minus stop risk, in price units.
    pub expected_value: Option<f64>,
    pub status: SignalStatus,
    pub exit_price: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
}

impl Signal {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Take-profit price for 1-based level `n`.
    pub fn tp(&self, n: usize) -> Option<f64> {
        n.checked_sub(1).and_then(|i| self.take_profits.get(i).copied())
    }

    /// Reward-to-risk of the first target.
    pub fn tp1_rr(&self) -> f64 {
        match self.tp(1) {
            Some(tp1) if self.risk > 0.0 => (tp1 - self.entry).abs() / self.risk,
            _ => 0.0,
        }
    }

    /// Signed move from entry to `price`, in percent of entry.
    pub fn pnl_pct(&self, price: f64) -> f64 {
        if self.entry == 0.0 {
            return 0.0;
        }
        (price - self.entry) / self.entry * 100.0 * self.side.sign()
    }

    /// Key used for alert cooldowns.
    pub fn alert_key(&self) -> String {
        alert_key(&self.symbol, self.timeframe)
    }
}

pub fn alert_key(symbol: &str, timeframe: Timeframe) -> String {
    format!("{}:{}", symbol, timeframe)
}
