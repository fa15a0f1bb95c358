pub mod atr;
pub mod levels;
pub mod moving_averages;
pub mod rsi;
pub mod smc;

pub use atr::{atr, true_range};
pub use levels::support_resistance;
pub use moving_averages::{ema, sma};
pub use rsi::rsi;
pub use smc::{FairValueGap, GapKind, Sweep, detect_equilibrium, detect_fvg, detect_sweep};

/// Latest value of an indicator series.
pub fn last(values: &[f64]) -> Option<f64> {
    values.last().copied()
}
