/// Rounds `value` half away from zero to `decimals` places.
///
/// # Examples
///
/// ```
/// use signalbot::utils::to_precision::round_to;
/// assert_eq!(round_to(123.456789, 5), 123.45679);
/// assert_eq!(round_to(0.0014, 3), 0.001);
/// assert_eq!(round_to(-2.5, 0), -3.0);
/// ```
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Fixed-point price string, e.g. `format_price(2012.5, 2) == "2012.50"`.
pub fn format_price(value: f64, decimals: usize) -> String {
    format!("{value:.decimals$}")
}

/// Display decimals for a price: large prices need fewer.
pub fn price_decimals(price: f64) -> usize {
    match price.abs() {
        p if p >= 1000.0 => 2,
        p if p >= 10.0 => 3,
        _ => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.234567, 2), 1.23);
        assert_eq!(round_to(1.235, 0), 1.0);
        assert_eq!(round_to(64123.456789, 5), 64123.45679);
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(2012.5, 2), "2012.50");
        assert_eq!(format_price(1.08, price_decimals(1.08)), "1.08000");
        assert_eq!(price_decimals(64000.0), 2);
    }
}
