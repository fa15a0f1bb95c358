use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use tracing::{debug, info};

use crate::config::Config;
use crate::market::Timeframe;
use crate::signal::Signal;
use crate::utils::to_precision::round_to;

const MIN_POSITION: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault)]
pub struct RiskLimits {
    #[default = 0.02]
    pub max_portfolio_risk: f64,
    #[default = 0.005]
    pub max_single_trade_risk: f64,
    #[default = 5]
    pub max_open_signals: usize,
    #[default = 1.2]
    pub min_rr: f64,
    #[default = 0.05]
    pub daily_loss_limit: f64,
    /// Equity below this fraction of balance halts trading.
    #[default = 0.8]
    pub equity_floor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskDecision {
    pub approved: bool,
    pub reason: String,
}

impl RiskDecision {
    fn approve(reason: &str) -> Self {
        Self {
            approved: true,
            reason: reason.to_string(),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
        }
    }
}

/// Today's realised result, used by `check_limits`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DailyStats {
    /// Sum of closed-signal P&L today, percent.
    pub pnl_pct: f64,
    pub equity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskReport {
    pub portfolio_risk_pct: f64,
    pub max_portfolio_risk_pct: f64,
    pub open_signals: usize,
    pub max_open_signals: usize,
    pub unique_symbols: usize,
    pub correlation: RiskLevel,
    pub utilization: RiskLevel,
    pub available_risk_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetClass {
    Crypto,
    Metals,
    FxMajors,
}

fn asset_class(symbol: &str) -> Option<AssetClass> {
    match symbol {
        "BTCUSD" | "ETHUSD" | "LTCUSD" => Some(AssetClass::Crypto),
        "XAUUSD" | "XAGUSD" => Some(AssetClass::Metals),
        "EURUSD" | "GBPUSD" | "USDJPY" => Some(AssetClass::FxMajors),
        _ => None,
    }
}

fn timeframe_factor(timeframe: Timeframe) -> f64 {
    match timeframe {
        Timeframe::M3 => 0.6,
        Timeframe::M5 => 0.7,
        Timeframe::M15 => 0.8,
        Timeframe::M30 => 1.0,
        Timeframe::H1 => 1.2,
        Timeframe::H4 => 1.5,
        Timeframe::D1 => 2.0,
        Timeframe::M1 => 1.0,
    }
}

/// (multiplier, min lots, max lots)
fn symbol_sizing(symbol: &str) -> (f64, f64, f64) {
    match symbol {
        "BTCUSD" => (0.5, MIN_POSITION, 0.5),
        "XAUUSD" => (0.7, MIN_POSITION, 1.0),
        _ => (1.0, MIN_POSITION, 2.0),
    }
}

/// Position sizing and portfolio guards for generated signals.
#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: RiskLimits,
    signal_only: bool,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, signal_only: bool) -> Self {
        Self { limits, signal_only }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            RiskLimits {
                max_open_signals: config.max_open_signals,
                daily_loss_limit: config.daily_loss_limit,
                ..Default::default()
            },
            config.signal_only_mode,
        )
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    fn active<'a>(open: &'a [Signal]) -> impl Iterator<Item = &'a Signal> {
        open.iter().filter(|s| s.status.is_active())
    }

    fn open_risk(open: &[Signal]) -> f64 {
        Self::active(open)
            .map(|s| (s.entry - s.stop_loss).abs() * s.position_size.unwrap_or(MIN_POSITION))
            .sum()
    }

    /// Lots for `signal`, risking `max_single_trade_risk` of `balance`.
    pub fn position_size(&self, signal: &Signal, balance: f64, open: &[Signal]) -> f64 {
        if balance <= 0.0 {
            return MIN_POSITION;
        }
        let risk_per_unit = (signal.entry - signal.stop_loss).abs();
        if risk_per_unit == 0.0 {
            return MIN_POSITION;
        }

        let risk_amount = balance * self.limits.max_single_trade_risk;
        let (multiplier, min_size, max_size) = symbol_sizing(&signal.symbol);
        let correlation = self.correlation_factor(signal, open);
        let size = risk_amount / risk_per_unit
            * multiplier
            * correlation
            * self.portfolio_factor(open, balance)
            * timeframe_factor(signal.timeframe);

        let size = round_to(size.clamp(min_size, max_size), 3);
        info!(
            "Position size: {} {} = {:.3} lots (risk ${:.2}, correlation {:.2}x)",
            signal.symbol, signal.side, size, risk_amount, correlation
        );
        size
    }

    /// 1.0 with no overlap, shrinking for each correlated open signal, floored at 0.1.
    pub fn correlation_factor(&self, signal: &Signal, open: &[Signal]) -> f64 {
        let class = asset_class(&signal.symbol);
        let penalty: f64 = Self::active(open)
            .filter(|s| s.id != signal.id)
            .map(|s| {
                let same_side = s.side == signal.side;
                if s.symbol == signal.symbol {
                    if same_side { 0.5 } else { 0.3 }
                } else if class.is_some() && asset_class(&s.symbol) == class {
                    if same_side { 0.2 } else { 0.1 }
                } else {
                    0.0
                }
            })
            .sum();
        (1.0 - penalty).max(0.1)
    }

    pub fn portfolio_factor(&self, open: &[Signal], balance: f64) -> f64 {
        if balance <= 0.0 {
            return 1.0;
        }
        let risk_pct = Self::open_risk(open) / balance;
        let max = self.limits.max_portfolio_risk;
        if risk_pct >= max {
            0.1
        } else if risk_pct >= max * 0.8 {
            0.5
        } else if risk_pct >= max * 0.6 {
            0.8
        } else {
            1.0
        }
    }

    pub fn validate(&self, signal: &Signal, balance: f64, open: &[Signal]) -> RiskDecision {
        let open_count = Self::active(open).count();
        if open_count >= self.limits.max_open_signals {
            return RiskDecision::reject(format!(
                "Maximum open signals reached ({}/{})",
                open_count, self.limits.max_open_signals
            ));
        }
        if balance <= 0.0 && !self.signal_only {
            return RiskDecision::reject("Insufficient account balance (enable SIGNAL_ONLY_MODE to override)");
        }
        if signal.entry <= 0.0 || signal.stop_loss <= 0.0 {
            return RiskDecision::reject("Invalid entry or stop loss");
        }
        let risk = (signal.entry - signal.stop_loss).abs();
        if risk <= 0.0 {
            return RiskDecision::reject("Invalid risk calculation");
        }
        let Some(tp1) = signal.tp(1) else {
            return RiskDecision::reject("Signal has no take-profit levels");
        };
        let rr = (tp1 - signal.entry).abs() / risk;
        if rr < self.limits.min_rr {
            return RiskDecision::reject(format!("Poor risk-reward ratio: 1:{:.2}", rr));
        }
        if self.portfolio_factor(open, balance) < 0.5 {
            return RiskDecision::reject("Portfolio risk limit exceeded");
        }
        debug!("Risk validation passed for {} {}", signal.symbol, signal.side);
        RiskDecision::approve("Risk validation passed")
    }

    /// Account-level guards. Signal-only mode never trades, so it always passes.
    pub fn check_limits(&self, stats: &DailyStats, balance: f64, open_count: usize) -> RiskDecision {
        if self.signal_only {
            return RiskDecision::approve("Signal-only mode");
        }
        if open_count >= self.limits.max_open_signals {
            return RiskDecision::reject(format!("Maximum open signals reached ({})", open_count));
        }
        if stats.pnl_pct <= -self.limits.daily_loss_limit * 100.0 {
            return RiskDecision::reject(format!("Daily loss limit hit ({:.2}%)", stats.pnl_pct));
        }
        if balance > 0.0 && stats.equity < balance * self.limits.equity_floor {
            return RiskDecision::reject(format!(
                "Equity protection: {:.2} below {:.0}% of balance",
                stats.equity,
                self.limits.equity_floor * 100.0
            ));
        }
        RiskDecision::approve("Within limits")
    }

    pub fn report(&self, open: &[Signal], balance: f64) -> RiskReport {
        let active: Vec<&Signal> = Self::active(open).collect();
        let risk_pct = if balance > 0.0 {
            Self::open_risk(open) / balance * 100.0
        } else {
            0.0
        };
        let mut symbols: Vec<&str> = active.iter().map(|s| s.symbol.as_str()).collect();
        symbols.sort_unstable();
        symbols.dedup();
        let duplicates = active.len() - symbols.len();
        let correlation = match duplicates {
            0 => RiskLevel::Low,
            1 | 2 => RiskLevel::Medium,
            _ => RiskLevel::High,
        };
        let utilization = if risk_pct > 1.5 {
            RiskLevel::High
        } else if risk_pct > 1.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
        let max_pct = self.limits.max_portfolio_risk * 100.0;

        RiskReport {
            portfolio_risk_pct: round_to(risk_pct, 2),
            max_portfolio_risk_pct: max_pct,
            open_signals: active.len(),
            max_open_signals: self.limits.max_open_signals,
            unique_symbols: symbols.len(),
            correlation,
            utilization,
            available_risk_pct: round_to((max_pct - risk_pct).max(0.0), 2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalStatus;
    use crate::signal::fixtures::{buy_signal, sell_signal};

    fn manager() -> RiskManager {
        RiskManager::new(RiskLimits::default(), true)
    }

    #[test]
    fn test_position_size_zero_balance() {
        let signal = buy_signal("BTCUSD", 60_000.0, 59_900.0);
        assert_eq!(manager().position_size(&signal, 0.0, &[]), 0.01);
    }

    #[test]
    fn test_position_size_scales_and_clamps() {
        // 10_000 * 0.005 / 10 = 5 lots, * 0.7 (XAU) * 0.7 (M5) = 2.45, clamped to 1.0
        let gold = buy_signal("XAUUSD", 2_000.0, 1_990.0);
        assert_eq!(manager().position_size(&gold, 10_000.0, &[]), 1.0);

        // 10_000 * 0.005 / 100 = 0.5, * 1.0 * 0.7 = 0.35
        let fx = buy_signal("EURUSD", 200.0, 100.0);
        assert_eq!(manager().position_size(&fx, 10_000.0, &[]), 0.35);
    }

    #[test]
    fn test_correlation_penalties() {
        let rm = manager();
        let signal = buy_signal("BTCUSD", 100.0, 95.0);
        assert_eq!(rm.correlation_factor(&signal, &[]), 1.0);

        let same = buy_signal("BTCUSD", 101.0, 96.0);
        assert!((rm.correlation_factor(&signal, &[same.clone()]) - 0.5).abs() < 1e-9);

        let opposite = sell_signal("BTCUSD", 101.0, 106.0);
        assert!((rm.correlation_factor(&signal, &[opposite]) - 0.7).abs() < 1e-9);

        let eth = buy_signal("ETHUSD", 10.0, 9.0);
        assert!((rm.correlation_factor(&signal, &[eth]) - 0.8).abs() < 1e-9);

        let unrelated = buy_signal("XAUUSD", 2_000.0, 1_990.0);
        assert_eq!(rm.correlation_factor(&signal, &[unrelated]), 1.0);

        let crowd = vec![same.clone(), same.clone(), same];
        assert!((rm.correlation_factor(&signal, &crowd) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_closed_signals_do_not_count() {
        let rm = manager();
        let signal = buy_signal("BTCUSD", 100.0, 95.0);
        let mut closed = buy_signal("BTCUSD", 101.0, 96.0);
        closed.status = SignalStatus::SlHit;
        assert_eq!(rm.correlation_factor(&signal, &[closed]), 1.0);
    }

    #[test]
    fn test_portfolio_factor_ladder() {
        let rm = manager();
        let mut open = buy_signal("EURUSD", 200.0, 100.0);
        // 100 * size / 10_000
        for (size, expected) in [(0.5, 1.0), (1.3, 0.8), (1.7, 0.5), (2.5, 0.1)] {
            open.position_size = Some(size);
            assert_eq!(rm.portfolio_factor(&[open.clone()], 10_000.0), expected, "size {}", size);
        }
    }

    #[test]
    fn test_validate_rules() {
        let rm = manager();
        let signal = buy_signal("XAUUSD", 2_000.0, 1_990.0);
        assert!(rm.validate(&signal, 10_000.0, &[]).approved);

        let mut poor = signal.clone();
        poor.take_profits[0] = 2_005.0;
        let decision = rm.validate(&poor, 10_000.0, &[]);
        assert!(!decision.approved);
        assert!(decision.reason.contains("risk-reward"));

        let mut flat = signal.clone();
        flat.stop_loss = flat.entry;
        assert!(!rm.validate(&flat, 10_000.0, &[]).approved);

        let open: Vec<Signal> = (0..5).map(|_| buy_signal("EURUSD", 1.1, 1.09)).collect();
        let decision = rm.validate(&signal, 10_000.0, &open);
        assert!(decision.reason.contains("Maximum open signals"));
    }

    #[test]
    fn test_zero_balance_outside_signal_only() {
        let signal = buy_signal("XAUUSD", 2_000.0, 1_990.0);
        let live = RiskManager::new(RiskLimits::default(), false);
        assert!(!live.validate(&signal, 0.0, &[]).approved);
        assert!(manager().validate(&signal, 0.0, &[]).approved);
    }

    #[test]
    fn test_check_limits() {
        let stats = DailyStats {
            pnl_pct: -6.0,
            equity: 10_000.0,
        };
        assert!(manager().check_limits(&stats, 10_000.0, 9).approved);

        let live = RiskManager::new(RiskLimits::default(), false);
        assert!(!live.check_limits(&stats, 10_000.0, 0).approved);
        assert!(!live.check_limits(&DailyStats { pnl_pct: 0.0, equity: 10_000.0 }, 10_000.0, 5).approved);
        assert!(!live.check_limits(&DailyStats { pnl_pct: 0.0, equity: 7_000.0 }, 10_000.0, 0).approved);
        assert!(live.check_limits(&DailyStats { pnl_pct: -1.0, equity: 9_500.0 }, 10_000.0, 1).approved);
    }

    #[test]
    fn test_report() {
        let rm = manager();
        let mut a = buy_signal("EURUSD", 200.0, 100.0);
        a.position_size = Some(1.0);
        let b = buy_signal("EURUSD", 200.0, 190.0);
        let report = rm.report(&[a, b], 10_000.0);
        assert_eq!(report.open_signals, 2);
        assert_eq!(report.unique_symbols, 1);
        assert_eq!(report.correlation, RiskLevel::Medium);
        // (100 * 1.0 + 10 * 0.01) / 10_000 = 1.001%
        assert_eq!(report.portfolio_risk_pct, 1.0);
        assert_eq!(report.utilization, RiskLevel::Medium);
        assert_eq!(report.available_risk_pct, 1.0);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["correlation"], "MEDIUM");
    }
}
