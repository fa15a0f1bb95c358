use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use tracing::debug;

use crate::config::Config;
use crate::market::{Candle, Timeframe};
use crate::signal::Signal;
use crate::utils::to_precision::round_to;

const PROBABILITY_FLOOR: f64 = 0.15;
const PROBABILITY_CEILING: f64 = 0.90;
/// Bars used for the volatility and trend-strength factors.
const VOLATILITY_BARS: usize = 20;
const TREND_BARS: usize = 10;

const W_HISTORICAL: f64 = 0.25;
const W_DISTANCE: f64 = 0.20;
const W_TIMEFRAME: f64 = 0.15;
const W_VOLATILITY: f64 = 0.10;
const W_MARKET: f64 = 0.15;
const W_RR: f64 = 0.10;
const W_CONFIDENCE: f64 = 0.05;

/// Inputs of the TP1 estimate, each in 0..=1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbabilityFactors {
    pub historical: f64,
    pub distance: f64,
    pub timeframe: f64,
    pub volatility: f64,
    pub market_condition: f64,
    pub rr_impact: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outlook {
    Strong,
    Moderate,
    Weak,
    Neutral,
    Avoid,
}

impl Outlook {
    pub fn from_estimate(probability: f64, expected_value: f64) -> Self {
        let positive = expected_value > 0.0;
        if probability >= 0.7 && positive {
            Outlook::Strong
        } else if probability >= 0.6 && positive {
            Outlook::Moderate
        } else if probability >= 0.5 && positive {
            Outlook::Weak
        } else if probability >= 0.4 {
            Outlook::Neutral
        } else {
            Outlook::Avoid
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, Outlook::Neutral | Outlook::Avoid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TpEstimate {
    /// Weighted estimate, clamped to 0.15..=0.90.
    pub probability: f64,
    /// `probability` in percent after session adjustment, within 1..=99.
    pub probability_pct: f64,
    pub expected_value: f64,
    pub rr_ratio: f64,
    pub outlook: Outlook,
    pub history_trades: usize,
    pub factors: ProbabilityFactors,
}

impl TpEstimate {
    /// Scale the percentage by a session probability multiplier.
    pub fn with_session(mut self, multiplier: f64) -> Self {
        self.probability_pct = round_to((self.probability_pct * multiplier).clamp(1.0, 99.0), 1);
        self
    }
}

/// TP distance in the symbol's pip units.
fn pip_distance(symbol: &str, distance: f64) -> f64 {
    match symbol {
        "BTCUSD" => distance / 100.0,
        "ETHUSD" => distance * 100.0,
        "XAUUSD" => distance * 10.0,
        _ => distance * 10_000.0,
    }
}

/// Exponential decay from 0.8 as the target moves away, within 0.1..=0.9.
fn distance_probability(symbol: &str, entry: f64, tp: f64) -> f64 {
    let pips = pip_distance(symbol, (tp - entry).abs());
    (0.8 * (-0.02 * pips).exp()).clamp(0.1, 0.9)
}

fn timeframe_probability(timeframe: Timeframe) -> f64 {
    match timeframe {
        Timeframe::M1 => 0.7,
        Timeframe::M3 => 0.75,
        Timeframe::M5 => 0.8,
        Timeframe::M15 => 0.85,
        Timeframe::M30 => 0.9,
        Timeframe::H1 => 0.95,
        Timeframe::H4 | Timeframe::D1 => 1.0,
    }
}

/// Mean absolute bar return over the last 20 bars, scaled to 0..=1.
fn volatility(candles: &[Candle]) -> f64 {
    let recent = &candles[candles.len().saturating_sub(VOLATILITY_BARS)..];
    if recent.len() < TREND_BARS {
        return 0.5;
    }
    let returns: Vec<f64> = recent
        .windows(2)
        .filter(|w| w[0].close != 0.0)
        .map(|w| ((w[1].close - w[0].close) / w[0].close).abs())
        .collect();
    if returns.is_empty() {
        return 0.5;
    }
    (returns.iter().sum::<f64>() / returns.len() as f64 * 100.0).min(1.0)
}

/// Stronger recent trends make targets likelier.
fn market_condition(candles: &[Candle]) -> f64 {
    if candles.len() < TREND_BARS {
        return 0.85;
    }
    let recent = &candles[candles.len() - TREND_BARS..];
    let first = recent[0].close;
    let last = recent[TREND_BARS - 1].close;
    if first == 0.0 {
        return 0.85;
    }
    let strength = ((last - first) / first).abs();
    if strength > 0.02 {
        0.9
    } else if strength > 0.01 {
        0.85
    } else {
        0.75
    }
}

/// Share of the symbol's closed signals that reached a target.
fn historical_rate(symbol: &str, closed: &[Signal]) -> (f64, usize) {
    let trades: Vec<&Signal> = closed.iter().filter(|s| s.symbol == symbol).collect();
    if trades.is_empty() {
        return (0.5, 0);
    }
    let wins = trades.iter().filter(|s| s.status.is_win()).count();
    (wins as f64 / trades.len() as f64, trades.len())
}

/// Weighted chance that `signal` reaches TP1, with the resulting expected value.
pub fn estimate_tp_probability(signal: &Signal, candles: &[Candle], closed: &[Signal]) -> TpEstimate {
    let tp1 = signal.tp(1).unwrap_or(signal.entry);
    let reward = (tp1 - signal.entry).abs();
    let risk = (signal.entry - signal.stop_loss).abs();
    let rr_ratio = if risk > 0.0 { reward / risk } else { 2.0 };

    let (historical, history_trades) = historical_rate(&signal.symbol, closed);
    let factors = ProbabilityFactors {
        historical,
        distance: distance_probability(&signal.symbol, signal.entry, tp1),
        timeframe: timeframe_probability(signal.timeframe),
        volatility: 1.0 - volatility(candles) * 0.3,
        market_condition: market_condition(candles),
        rr_impact: 1.0 / (1.0 + (rr_ratio - 1.0) * 0.1),
        confidence: signal.confidence,
    };

    let weighted = factors.historical * W_HISTORICAL
        + factors.distance * W_DISTANCE
        + factors.timeframe * W_TIMEFRAME
        + factors.volatility * W_VOLATILITY
        + factors.market_condition * W_MARKET
        + factors.rr_impact * W_RR
        + factors.confidence * W_CONFIDENCE;
    let probability = weighted.clamp(PROBABILITY_FLOOR, PROBABILITY_CEILING);
    let expected_value = probability * reward - (1.0 - probability) * risk;

    debug!(
        "TP1 estimate {} {}: {:.1}% EV {:.2} ({} past trades)",
        signal.symbol,
        signal.timeframe,
        probability * 100.0,
        expected_value,
        history_trades
    );

    TpEstimate {
        probability,
        probability_pct: round_to(probability * 100.0, 1),
        expected_value: round_to(expected_value, 2),
        rr_ratio: round_to(rr_ratio, 2),
        outlook: Outlook::from_estimate(probability, expected_value),
        history_trades,
        factors,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault)]
pub struct QualityThresholds {
    /// Percent; per-symbol minimums override it.
    #[default = 45.0]
    pub min_tp_probability: f64,
    #[default = 0.65]
    pub min_confidence: f64,
    #[default = 0.0]
    pub min_expected_value: f64,
    /// Max entry distance from the live price, as a fraction of price.
    #[default = 0.015]
    pub max_price_diff: f64,
    #[default = 1.0]
    pub min_rr: f64,
    #[default = 5.0]
    pub max_rr: f64,
    pub preferred_timeframes_only: bool,
}

struct SymbolFilter {
    min_probability: f64,
    preferred: &'static [Timeframe],
}

fn symbol_filter(symbol: &str) -> Option<SymbolFilter> {
    use Timeframe::*;
    match symbol {
        "BTCUSD" => Some(SymbolFilter {
            min_probability: 50.0,
            preferred: &[M3, M15, M30, H1],
        }),
        "ETHUSD" => Some(SymbolFilter {
            min_probability: 40.0,
            preferred: &[M3, M15, M30],
        }),
        "XAUUSD" => Some(SymbolFilter {
            min_probability: 45.0,
            preferred: &[M3, M5, M15, M30],
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityVerdict {
    pub passed: bool,
    pub failures: Vec<String>,
}

/// Last gate before a signal is sent: probability, confidence, expected value,
/// price drift, RR sanity and outlook.
#[derive(Debug, Clone, Default)]
pub struct QualityFilter {
    thresholds: QualityThresholds,
}

impl QualityFilter {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(QualityThresholds {
            preferred_timeframes_only: config.preferred_timeframes_only,
            ..Default::default()
        })
    }

    pub fn min_probability(&self, symbol: &str) -> f64 {
        symbol_filter(symbol)
            .map(|f| f.min_probability)
            .unwrap_or(self.thresholds.min_tp_probability)
    }

    /// Every failed check is reported, not just the first.
    pub fn check(&self, signal: &Signal, estimate: &TpEstimate, current_price: Option<f64>) -> QualityVerdict {
        let t = &self.thresholds;
        let mut failures = Vec::new();

        if signal.risk <= 0.0 {
            failures.push(format!("Unrealistic risk: {:.5}", signal.risk));
        }
        if estimate.rr_ratio < t.min_rr || estimate.rr_ratio > t.max_rr {
            failures.push(format!("Unrealistic RR ratio: {:.2}", estimate.rr_ratio));
        }

        let min_probability = self.min_probability(&signal.symbol);
        if estimate.probability_pct < min_probability {
            failures.push(format!(
                "TP probability {:.1}% below {:.0}% for {}",
                estimate.probability_pct, min_probability, signal.symbol
            ));
        }
        if signal.confidence < t.min_confidence {
            failures.push(format!(
                "Confidence {:.0}% below {:.0}%",
                signal.confidence * 100.0,
                t.min_confidence * 100.0
            ));
        }
        if estimate.expected_value < t.min_expected_value {
            failures.push(format!("Expected value {:.2} below {:.2}", estimate.expected_value, t.min_expected_value));
        }

        if let Some(price) = current_price.filter(|p| *p > 0.0) {
            let diff = (signal.entry - price).abs() / price;
            if diff > t.max_price_diff {
                failures.push(format!(
                    "Entry {:.2}% away from the live price",
                    diff * 100.0
                ));
            }
        }

        if t.preferred_timeframes_only {
            if let Some(filter) = symbol_filter(&signal.symbol) {
                if !filter.preferred.contains(&signal.timeframe) {
                    failures.push(format!("{} is not a preferred timeframe for {}", signal.timeframe, signal.symbol));
                }
            }
        }

        if estimate.outlook.is_negative() {
            failures.push(format!("Negative outlook: {:?}", estimate.outlook));
        }

        QualityVerdict {
            passed: failures.is_empty(),
            failures,
        }
    }
}
