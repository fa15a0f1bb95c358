use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use tracing::warn;

use crate::market::Timeframe;


#[derive(Debug,Clone,Serialize,Deserialize,SmartDefault)]
#[serde(default)]
pub struct Config{
    #[default = "BTCUSD,XAUUSD"]
    pub symbols:String,
    #[default = "M3,M5,M15"]
    pub timeframes:String,
    #[default = "binance"]
    pub data_source:String,
    #[default = 10]
    pub scan_interval_secs:u64,
    #[default = 60]
    pub cooldown_secs:u64,
    #[default = 100]
    pub history_bars:usize,
    #[default = 30]
    pub min_bars:usize,
    #[default = 3]
    pub fetch_retries:usize,
    #[default = 2000]
    pub fetch_retry_delay_ms:u64,
    pub telegram_bot_token:String,
    pub telegram_chat_ids:String,
    #[default = 15]
    pub telegram_timeout_secs:u64,
    #[default = 2]
    pub telegram_max_retries:usize,
    #[default = 3050]
    pub web_ui_port:u16,
    #[default = true]
    pub signal_only_mode:bool,
    #[default = 10000.0]
    pub account_balance:f64,
    #[default = 5]
    pub max_open_signals:usize,
    #[default = 0.05]
    pub daily_loss_limit:f64,
    /// Gate signals on TP probability, expected value and confidence.
    #[default = true]
    pub quality_filter:bool,
    /// Only accept each symbol's preferred timeframes.
    pub preferred_timeframes_only:bool,
    #[default = "data/scanner_state.json"]
    pub state_file:String,
    #[default = "data"]
    pub data_dir: String,
    #[default = "logs"]
    pub log_dir:String,
    pub mock_seed:Option<u64>,
    #[default = 5]
    pub max_consecutive_errors:usize,
    #[default = 30]
    pub backtest_lookback_days:i64,
    /// YYYY-MM-DD; when set, the collector starts empty caches here.
    pub backtest_start_date:String,
    #[default = 48]
    pub backtest_max_hold_bars:usize,
}

impl Config{
    pub fn load()->Self{
        match envy::from_env::<Config>() {
            Ok(config) => config,
            Err(e) => {
                warn!("Invalid environment configuration ({}), using defaults", e);
                Config::default()
            }
        }
    }

    pub fn symbols(&self)->Vec<String>{
        split_list(&self.symbols).into_iter().map(|s| s.to_uppercase()).collect()
    }

    pub fn timeframes(&self)->Vec<Timeframe>{
        split_list(&self.timeframes)
            .into_iter()
            .filter_map(|tf| match tf.parse::<Timeframe>() {
                Ok(tf) => Some(tf),
                Err(e) => {
                    warn!("Skipping timeframe '{}': {}", tf, e);
                    None
                }
            })
            .collect()
    }

    pub fn with_symbols(mut self,symbols:&str)->Self{
        self.symbols=symbols.to_string();
        self
    }

    pub fn with_timeframes(mut self,timeframes:&str)->Self{
        self.timeframes=timeframes.to_string();
        self
    }

    pub fn with_telegram_chat_ids(mut self,chat_ids:&str)->Self{
        self.telegram_chat_ids=chat_ids.to_string();
        self
    }

    pub fn telegram_chat_ids(&self)->Vec<String>{
        split_list(&self.telegram_chat_ids)
    }

    pub fn telegram_enabled(&self)->bool{
        !self.telegram_bot_token.is_empty() && !self.telegram_chat_ids().is_empty()
    }
}

fn split_list(value:&str)->Vec<String>{
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Per-symbol parameters for stop-loss / take-profit placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolSettings {
    pub atr_multiplier_sl: f64,
    /// In points; multiplied by `point_value` to get a price distance.
    pub max_sl_distance: f64,
    pub rr_multiplier: f64,
    pub point_value: f64,
}

impl Default for SymbolSettings {
    fn default() -> Self {
        Self {
            atr_multiplier_sl: 1.0,
            max_sl_distance: 100.0,
            rr_multiplier: 1.5,
            point_value: 0.01,
        }
    }
}

impl SymbolSettings {
    pub fn for_symbol(symbol: &str) -> Self {
        let symbol = symbol.to_uppercase();
        let (sl, max_sl, rr) = match symbol.as_str() {
            "BTCUSD" => (2.0, 300.0, 2.0),
            "ETHUSD" => (2.0, 160.0, 2.0),
            "EURUSD" => (1.5, 60.0, 1.5),
            "GBPUSD" => (1.5, 60.0, 1.5),
            "USDJPY" => (1.2, 40.0, 1.2),
            "XAUUSD" => (1.8, 200.0, 1.8),
            "US30" => (1.0, 100.0, 1.5),
            "NAS100" => (1.0, 100.0, 1.6),
            _ => return Self::default(),
        };
        let point_value = if matches!(symbol.as_str(), "BTCUSD" | "ETHUSD") { 1.0 } else { 0.01 };
        Self {
            atr_multiplier_sl: sl,
            max_sl_distance: max_sl,
            rr_multiplier: rr,
            point_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lists() {
        let config = Config::default();
        assert_eq!(config.symbols(), vec!["BTCUSD".to_string(), "XAUUSD".to_string()]);
        assert_eq!(config.timeframes(), vec![Timeframe::M3, Timeframe::M5, Timeframe::M15]);
        assert!(!config.telegram_enabled());
        assert!(config.signal_only_mode);
        assert!(config.quality_filter);
        assert!(!config.preferred_timeframes_only);
    }

    #[test]
    fn test_invalid_timeframes_are_skipped() {
        let config = Config {
            timeframes: "M5, bogus ,1h".into(),
            ..Default::default()
        };
        assert_eq!(config.timeframes(), vec![Timeframe::M5, Timeframe::H1]);
    }

    #[test]
    fn test_telegram_needs_token_and_chat() {
        let mut config = Config {
            telegram_bot_token: "123:abc".into(),
            ..Default::default()
        };
        assert!(!config.telegram_enabled());
        config.telegram_chat_ids = "111, 222".into();
        assert!(config.telegram_enabled());
        assert_eq!(config.telegram_chat_ids(), vec!["111".to_string(), "222".to_string()]);
    }

    #[test]
    fn test_symbol_settings_lookup() {
        let btc = SymbolSettings::for_symbol("btcusd");
        assert_eq!(btc.point_value, 1.0);
        assert_eq!(btc.rr_multiplier, 2.0);
        let gold = SymbolSettings::for_symbol("XAUUSD");
        assert_eq!(gold.point_value, 0.01);
        assert_eq!(gold.atr_multiplier_sl, 1.8);
        assert_eq!(gold.max_sl_distance, 200.0);
        assert_eq!(SymbolSettings::for_symbol("DOGEUSD"), SymbolSettings::default());
    }
}
