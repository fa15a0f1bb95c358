use crate::market::Candle;

/// Lowest low and highest high of the last `window` candles.
pub fn support_resistance(candles: &[Candle], window: usize) -> Option<(f64, f64)> {
    if window == 0 || candles.len() < window {
        return None;
    }
    let recent = &candles[candles.len() - window..];
    let support = recent.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let resistance = recent.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    Some((support, resistance))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_support_resistance_window() {
        let candles: Vec<Candle> = [(10.0, 5.0), (12.0, 8.0), (11.0, 9.0), (15.0, 7.0)]
            .iter()
            .map(|(high, low)| Candle {
                high: *high,
                low: *low,
                ..Default::default()
            })
            .collect();
        assert_eq!(support_resistance(&candles, 3), Some((7.0, 15.0)));
        assert_eq!(support_resistance(&candles, 4), Some((5.0, 15.0)));
        assert_eq!(support_resistance(&candles, 5), None);
    }
}
