use serde::Serialize;

use super::Side;
use crate::config::SymbolSettings;
use crate::market::Timeframe;
use crate::utils::to_precision::round_to;

/// Multiples of the base reward distance for TP1..TP5.
pub const TP_MULTIPLIERS: [f64; 5] = [1.0, 1.5, 2.0, 2.5, 3.0];
const LEVEL_DECIMALS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Levels {
    pub stop_loss: f64,
    pub take_profits: Vec<f64>,
    /// Distance between entry and the unrounded stop.
    pub risk: f64,
}

/// ATR-based stop and take-profit ladder.
///
/// Distances widen on slower charts by `0.8 + 0.2 * tp_sl_factor`. The stop is
/// the nearer of the ATR stop and the per-symbol maximum distance.
pub fn calculate_levels(settings: &SymbolSettings, side: Side, entry: f64, atr: f64, timeframe: Timeframe) -> Levels {
    let scale = 0.8 + 0.2 * timeframe.tp_sl_factor();
    let atr_distance = atr.abs() * settings.atr_multiplier_sl * scale;
    let max_distance = settings.max_sl_distance * settings.point_value * scale;
    let sl_distance = atr_distance.min(max_distance);

    let stop_loss = entry - side.sign() * sl_distance;
    let risk = (entry - stop_loss).abs();
    let take_profits = TP_MULTIPLIERS
        .iter()
        .map(|m| round_to(entry + side.sign() * risk * settings.rr_multiplier * m * scale, LEVEL_DECIMALS))
        .collect();

    Levels {
        stop_loss: round_to(stop_loss, LEVEL_DECIMALS),
        take_profits,
        risk,
    }
}
