/// RSI from rolling means of gains and losses.
///
/// One value per full window of `period` price changes, so the output has
/// `closes.len() - period` entries. A series with no losses saturates near 100.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);
    for pair in closes.windows(2) {
        let change = pair[1] - pair[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    gains
        .windows(period)
        .zip(losses.windows(period))
        .map(|(g, l)| {
            let avg_gain = g.iter().sum::<f64>() / period as f64;
            let avg_loss = l.iter().sum::<f64>() / period as f64;
            let rs = avg_gain / (avg_loss + 1e-9);
            100.0 - 100.0 / (1.0 + rs)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_calculation() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let values = rsi(&closes, 14);
        assert_eq!(values.len(), 16);
        assert!(values.iter().all(|v| *v > 99.0));

        let falling: Vec<f64> = closes.iter().rev().copied().collect();
        assert!(rsi(&falling, 14).iter().all(|v| *v < 1.0));
    }

    #[test]
    fn test_rsi_balanced_moves() {
        let closes: Vec<f64> = (0..31).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        let last = *rsi(&closes, 14).last().unwrap();
        assert!((last - 50.0).abs() < 5.0, "rsi was {}", last);
    }

    #[test]
    fn test_rsi_not_enough_data() {
        assert!(rsi(&[1.0, 2.0, 3.0], 14).is_empty());
    }
}
