//! Smart-money-concept patterns: fair value gaps, liquidity sweeps and
//! equilibrium (tight range) zones.

use serde::{Deserialize, Serialize};

use crate::market::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapKind {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FairValueGap {
    pub kind: GapKind,
    pub index: usize,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sweep {
    /// Last candle wicked above the recent highs.
    BullishSweep,
    /// Last candle wicked below the recent lows.
    BearishSweep,
}

/// Gaps around each of the last `lookback - 1` inner candles.
pub fn detect_fvg(candles: &[Candle], lookback: usize) -> Vec<FairValueGap> {
    let mut gaps = Vec::new();
    if lookback < 2 || candles.len() < lookback + 1 {
        return gaps;
    }

    for i in candles.len() - lookback..candles.len() - 1 {
        let (prev, curr, next) = (&candles[i - 1], &candles[i], &candles[i + 1]);
        if curr.high > prev.low && next.low > curr.high {
            gaps.push(FairValueGap {
                kind: GapKind::Bullish,
                index: i,
                price: curr.high,
            });
        }
        if curr.low < prev.high && next.high < curr.low {
            gaps.push(FairValueGap {
                kind: GapKind::Bearish,
                index: i,
                price: curr.low,
            });
        }
    }
    gaps
}

/// Compares the last candle with the `lookback` candles before the previous one.
pub fn detect_sweep(candles: &[Candle], lookback: usize) -> Option<Sweep> {
    if lookback == 0 || candles.len() < lookback + 2 {
        return None;
    }
    let n = candles.len();
    let reference = &candles[n - lookback - 2..n - 2];
    let recent_high = reference.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let recent_low = reference.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let current = &candles[n - 1];

    if current.high > recent_high {
        Some(Sweep::BullishSweep)
    } else if current.low < recent_low {
        Some(Sweep::BearishSweep)
    } else {
        None
    }
}

/// `(low, high)` of the last `lookback` candles when that range is under 1% of
/// the last close.
pub fn detect_equilibrium(candles: &[Candle], lookback: usize) -> Option<(f64, f64)> {
    if lookback == 0 || candles.len() < lookback {
        return None;
    }
    let recent = &candles[candles.len() - lookback..];
    let high = recent.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let low = recent.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let close = recent.last()?.close;
    if close > 0.0 && (high - low) / close < 0.01 {
        Some((low, high))
    } else {
        None
    }
}
