use chrono::{DateTime, Duration, NaiveDate, Utc};
use color_eyre::eyre::{Result, WrapErr, eyre};

/// Midnight UTC of a `YYYY-MM-DD` date, as Unix milliseconds.
pub fn date_string_to_millis(date_str: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
        .wrap_err_with(|| format!("Invalid date '{}', expected YYYY-MM-DD", date_str))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| eyre!("Invalid midnight for {}", date_str))?;
    Ok(midnight.and_utc().timestamp_millis())
}

/// Start of a download window: `start_date` when given, else `lookback_days` before `now`.
pub fn window_start(start_date: &str, lookback_days: i64, now: DateTime<Utc>) -> Result<i64> {
    if start_date.trim().is_empty() {
        Ok((now - Duration::days(lookback_days)).timestamp_millis())
    } else {
        date_string_to_millis(start_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_parsing() {
        assert_eq!(date_string_to_millis("1970-01-02").unwrap(), 86_400_000);
        assert_eq!(date_string_to_millis("2025-08-12").unwrap(), 1_754_956_800_000);
        assert!(date_string_to_millis("12/08/2025").is_err());
    }

    #[test]
    fn test_window_start() {
        let now = DateTime::<Utc>::from_timestamp_millis(10 * 86_400_000).unwrap();
        assert_eq!(window_start("", 3, now).unwrap(), 7 * 86_400_000);
        assert_eq!(window_start("1970-01-02", 3, now).unwrap(), 86_400_000);
    }
}
