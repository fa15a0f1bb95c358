use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::eyre::{Result, eyre};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Candle, MarketDataSource, Timeframe};

/// Relative size of one random-walk step.
const STEP: f64 = 0.002;

#[derive(Debug)]
struct WalkState {
    rng: StdRng,
    last_price: HashMap<String, f64>,
}

/// Random-walk candle generator for offline runs and tests.
#[derive(Debug)]
pub struct MockFeed {
    state: Mutex<WalkState>,
    drift: HashMap<String, f64>,
}

impl MockFeed {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Same seed, same candles.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            state: Mutex::new(WalkState {
                rng,
                last_price: HashMap::new(),
            }),
            drift: HashMap::new(),
        }
    }

    /// Bias every step for `symbol` by `drift` (fraction of price, e.g. 0.003).
    pub fn with_trend(mut self, symbol: &str, drift: f64) -> Self {
        self.drift.insert(symbol.to_uppercase(), drift);
        self
    }

    /// Pin the starting price of `symbol`.
    pub fn with_price(self, symbol: &str, price: f64) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.last_price.insert(symbol.to_uppercase(), price);
        }
        self
    }

    fn base_price(rng: &mut StdRng, symbol: &str) -> f64 {
        match symbol {
            "BTCUSD" => rng.gen_range(40_000.0..70_000.0),
            "XAUUSD" => rng.gen_range(1_900.0..2_100.0),
            _ => rng.gen_range(90.0..110.0),
        }
    }

    fn generate(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        let symbol = symbol.to_uppercase();
        let drift = self.drift.get(&symbol).copied().unwrap_or(0.0);
        let mut state = self.state.lock().map_err(|_| eyre!("mock feed state poisoned"))?;
        let WalkState { rng, last_price } = &mut *state;

        let mut price = match last_price.get(&symbol) {
            Some(p) => *p,
            None => Self::base_price(rng, &symbol),
        };

        let step_ms = timeframe.millis();
        let now = Utc::now().timestamp_millis();
        let last_open = now - now.rem_euclid(step_ms);
        let first_open = last_open - step_ms * (limit as i64 - 1).max(0);

        let mut candles = Vec::with_capacity(limit);
        for i in 0..limit {
            // mean of three uniforms, roughly bell shaped
            let noise: f64 = (0..3).map(|_| rng.gen_range(-1.0..1.0)).sum::<f64>() / 3.0;
            let open = price;
            let close = (open * (1.0 + drift + noise * STEP)).max(f64::EPSILON);
            let wick = open * STEP * rng.gen_range(0.0..0.5);
            let high = open.max(close) + wick;
            let low = (open.min(close) - wick).max(f64::EPSILON);
            let open_time = first_open + step_ms * i as i64;
            candles.push(Candle {
                open_time,
                close_time: open_time + step_ms - 1,
                open,
                high,
                low,
                close,
                volume: rng.gen_range(100.0..1_000.0),
            });
            price = close;
        }

        last_price.insert(symbol, price);
        Ok(candles)
    }
}

impl Default for MockFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataSource for MockFeed {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        self.generate(symbol, timeframe, limit)
    }

    async fn current_price(&self, symbol: &str) -> Result<f64> {
        let symbol = symbol.to_uppercase();
        {
            let state = self.state.lock().map_err(|_| eyre!("mock feed state poisoned"))?;
            if let Some(price) = state.last_price.get(&symbol) {
                return Ok(*price);
            }
        }
        let candles = self.generate(&symbol, Timeframe::M1, 1)?;
        candles
            .last()
            .map(|c| c.close)
            .ok_or_else(|| eyre!("mock feed produced no candle for {}", symbol))
    }
}
