/// Simple moving average, one value per full window.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let mut sma_values = Vec::with_capacity(values.len() - period + 1);
    let mut sum: f64 = values[..period].iter().sum();
    sma_values.push(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        sma_values.push(sum / period as f64);
    }

    sma_values
}

/// Exponential moving average seeded with the SMA of the first `period` values.
///
/// The first output lines up with `values[period - 1]`; empty when there is not
/// enough data.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut ema_values = Vec::with_capacity(values.len() - period + 1);
    ema_values.push(seed);
    let mut prev = seed;
    for value in &values[period..] {
        prev = (value - prev) * multiplier + prev;
        ema_values.push(prev);
    }

    ema_values
}
