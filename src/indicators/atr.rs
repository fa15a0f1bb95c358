use crate::market::Candle;

/// True range of `current` against the previous close.
pub fn true_range(current: &Candle, previous: Option<&Candle>) -> f64 {
    let high_low = current.high - current.low;
    match previous {
        Some(prev) => high_low
            .max((current.high - prev.close).abs())
            .max((current.low - prev.close).abs()),
        None => high_low,
    }
}

/// Rolling mean of the true range. The first candle has no previous close and
/// contributes its high-low range.
pub fn atr(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period {
        return Vec::new();
    }

    let ranges: Vec<f64> = candles
        .iter()
        .enumerate()
        .map(|(i, c)| true_range(c, i.checked_sub(1).map(|p| &candles[p])))
        .collect();

    ranges
        .windows(period)
        .map(|w| w.iter().sum::<f64>() / period as f64)
        .collect()
}
