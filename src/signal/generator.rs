use chrono::Utc;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use tracing::debug;

use super::{Side, Signal, SignalStatus, Trend, calculate_levels};
use crate::config::SymbolSettings;
use crate::indicators::{self, FairValueGap, GapKind, Sweep};
use crate::market::{Candle, Timeframe, closes};
use crate::utils::to_precision::round_to;

#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct GeneratorParams {
    #[default = 20]
    pub fast_period: usize,
    #[default = 50]
    pub slow_period: usize,
    #[default = 14]
    pub rsi_period: usize,
    #[default = 14]
    pub atr_period: usize,
    #[default = 55.0]
    pub rsi_buy: f64,
    #[default = 45.0]
    pub rsi_sell: f64,
    /// Max distance of the close from support/resistance, as a fraction of price.
    #[default = 0.03]
    pub proximity: f64,
    #[default = 20]
    pub sr_window: usize,
    #[default = 3]
    pub fvg_lookback: usize,
    #[default = 10]
    pub smc_lookback: usize,
}

/// Indicator snapshot for one symbol/timeframe, plus the signal if one fired.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bars: usize,
    pub price: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    pub trend: Option<Trend>,
    pub fvg: Vec<FairValueGap>,
    pub sweep: Option<Sweep>,
    pub equilibrium: Option<(f64, f64)>,
    pub signal: Option<Signal>,
    /// Why no signal was produced.
    pub reason: Option<String>,
}

impl Evaluation {
    fn empty(symbol: &str, timeframe: Timeframe, bars: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            bars,
            price: None,
            ema_fast: None,
            ema_slow: None,
            rsi: None,
            atr: None,
            support: None,
            resistance: None,
            trend: None,
            fvg: Vec::new(),
            sweep: None,
            equilibrium: None,
            signal: None,
            reason: None,
        }
    }

    fn skip(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// EMA/RSI trend signals confirmed by proximity to support or resistance.
#[derive(Debug, Clone, Default)]
pub struct SignalGenerator {
    params: GeneratorParams,
}

impl SignalGenerator {
    pub fn new(params: GeneratorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &GeneratorParams {
        &self.params
    }

    /// Bars needed before `evaluate` can produce a signal.
    pub fn min_bars(&self) -> usize {
        self.params
            .slow_period
            .max(self.params.fast_period)
            .max(self.params.rsi_period + 1)
            .max(self.params.atr_period)
            .max(self.params.sr_window)
    }

    pub fn evaluate(&self, symbol: &str, timeframe: Timeframe, candles: &[Candle]) -> Evaluation {
        let p = &self.params;
        let mut eval = Evaluation::empty(symbol, timeframe, candles.len());
        let Some(last) = candles.last() else {
            return eval.skip("no candles");
        };
        let price = last.close;
        eval.price = Some(price);

        let closes = closes(candles);
        eval.ema_fast = indicators::last(&indicators::ema(&closes, p.fast_period));
        eval.ema_slow = indicators::last(&indicators::ema(&closes, p.slow_period));
        eval.rsi = indicators::last(&indicators::rsi(&closes, p.rsi_period));
        eval.atr = indicators::last(&indicators::atr(candles, p.atr_period));
        if let Some((support, resistance)) = indicators::support_resistance(candles, p.sr_window) {
            eval.support = Some(support);
            eval.resistance = Some(resistance);
        }
        eval.fvg = indicators::detect_fvg(candles, p.fvg_lookback);
        eval.sweep = indicators::detect_sweep(candles, p.smc_lookback);
        eval.equilibrium = indicators::detect_equilibrium(candles, p.smc_lookback);

        let (Some(fast), Some(slow), Some(rsi), Some(atr), Some(support), Some(resistance)) = (
            eval.ema_fast,
            eval.ema_slow,
            eval.rsi,
            eval.atr,
            eval.support,
            eval.resistance,
        ) else {
            let reason = format!("need {} bars, have {}", self.min_bars(), candles.len());
            return eval.skip(reason);
        };

        if fast > slow {
            eval.trend = Some(Trend::Bullish);
        } else if fast < slow {
            eval.trend = Some(Trend::Bearish);
        }

        let band = price * p.proximity;
        let side = if fast > slow && rsi > p.rsi_buy && (price - support).abs() < band {
            Side::Buy
        } else if fast < slow && rsi < p.rsi_sell && (price - resistance).abs() < band {
            Side::Sell
        } else {
            debug!(
                "No setup for {} {}: ema {:.5}/{:.5} rsi {:.1} price {:.5} S/R {:.5}/{:.5}",
                symbol, timeframe, fast, slow, rsi, price, support, resistance
            );
            return eval.skip("no trend/RSI/level confluence");
        };

        if atr <= 0.0 {
            return eval.skip("flat market (ATR is zero)");
        }

        let settings = SymbolSettings::for_symbol(symbol);
        let levels = calculate_levels(&settings, side, price, atr, timeframe);
        let confidence = self.confidence(side, fast, slow, rsi, atr, &eval);
        let trend = match side {
            Side::Buy => Trend::Bullish,
            Side::Sell => Trend::Bearish,
        };

        let mut signal = Signal {
            id: Signal::new_id(),
            symbol: symbol.to_string(),
            timeframe,
            side,
            trend,
            entry: round_to(price, 5),
            stop_loss: levels.stop_loss,
            take_profits: levels.take_profits,
            atr: round_to(atr, 5),
            risk: levels.risk,
            rr_ratio: 0.0,
            confidence,
            support,
            resistance,
            fvg: eval.fvg.clone(),
            sweep: eval.sweep,
            equilibrium: eval.equilibrium,
            position_size: None,
            session_score: None,
            tp_probability: None,
            expected_value: None,
            status: SignalStatus::Open,
            exit_price: None,
            closed_at: None,
            generated_at: Utc::now(),
        };
        signal.rr_ratio = round_to(signal.tp1_rr(), 2);

        debug!(
            "{} {} {} signal: entry {:.5} SL {:.5} TP1 {:.5} conf {:.2}",
            symbol,
            timeframe,
            side,
            signal.entry,
            signal.stop_loss,
            signal.take_profits[0],
            confidence
        );
        eval.signal = Some(signal);
        eval
    }

    /// 0.5 base, plus RSI strength, EMA separation in ATRs and aligned
    /// smart-money patterns.
    fn confidence(&self, side: Side, fast: f64, slow: f64, rsi: f64, atr: f64, eval: &Evaluation) -> f64 {
        let rsi_strength = ((rsi - 50.0).abs() / 100.0).min(0.2);
        let separation = ((fast - slow).abs() / atr * 0.05).min(0.15);

        let wanted_gap = match side {
            Side::Buy => GapKind::Bullish,
            Side::Sell => GapKind::Bearish,
        };
        let wanted_sweep = match side {
            Side::Buy => Sweep::BearishSweep,
            Side::Sell => Sweep::BullishSweep,
        };
        let mut confluence = 0.0;
        if eval.fvg.iter().any(|g| g.kind == wanted_gap) {
            confluence += 0.05;
        }
        if eval.sweep == Some(wanted_sweep) {
            confluence += 0.05;
        }

        round_to((0.5 + rsi_strength + separation + confluence).clamp(0.0, 1.0), 2)
    }
}


#[cfg(test)]
mod tests {
    use super::test_series::*;
    use super::*;

    #[test]
    fn test_buy_signal_in_uptrend() {
        let generator = SignalGenerator::default();
        let candles = uptrend(80, 1_000.0);
        let eval = generator.evaluate("XAUUSD", Timeframe::M5, &candles);
        assert_eq!(eval.trend, Some(Trend::Bullish));
        let signal = eval.signal.expect("uptrend should produce a buy");
        assert_eq!(signal.side, Side::Buy);
        assert!(signal.stop_loss < signal.entry);
        assert!(signal.take_profits.iter().all(|tp| *tp > signal.entry));
        assert!(signal.take_profits.windows(2).all(|w| w[0] < w[1]));
        assert!((0.0..=1.0).contains(&signal.confidence));
        assert!(signal.rr_ratio > 1.0);
    }

    #[test]
    fn test_sell_signal_in_downtrend() {
        let generator = SignalGenerator::default();
        let candles = downtrend(80, 2_000.0);
        let eval = generator.evaluate("XAUUSD", Timeframe::M15, &candles);
        assert_eq!(eval.trend, Some(Trend::Bearish));
        let signal = eval.signal.expect("downtrend should produce a sell");
        assert_eq!(signal.side, Side::Sell);
        assert!(signal.stop_loss > signal.entry);
        assert!(signal.take_profits.iter().all(|tp| *tp < signal.entry));
    }

    #[test]
    fn test_not_enough_bars() {
        let generator = SignalGenerator::default();
        let eval = generator.evaluate("BTCUSD", Timeframe::M5, &uptrend(30, 100.0));
        assert!(eval.signal.is_none());
        assert!(eval.ema_fast.is_some());
        assert!(eval.ema_slow.is_none());
        assert!(eval.reason.unwrap().contains("need 50 bars"));

        let eval = generator.evaluate("BTCUSD", Timeframe::M5, &[]);
        assert!(eval.price.is_none());
    }

    #[test]
    fn test_flat_market_gives_no_signal() {
        let generator = SignalGenerator::default();
        let eval = generator.evaluate("BTCUSD", Timeframe::M5, &flat(80, 100.0));
        assert!(eval.signal.is_none());
        assert_eq!(eval.trend, None);
    }

    #[test]
    fn test_far_from_support_blocks_buy() {
        let generator = SignalGenerator::new(GeneratorParams {
            proximity: 0.0001,
            ..Default::default()
        });
        let eval = generator.evaluate("XAUUSD", Timeframe::M5, &uptrend(80, 1_000.0));
        assert_eq!(eval.trend, Some(Trend::Bullish));
        assert!(eval.signal.is_none());
    }
}
