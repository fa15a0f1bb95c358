//! Plain-text Telegram messages with light HTML markup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signal::Signal;
use crate::tracker::{Outcome, Performance};
use crate::utils::to_precision::{format_price, price_decimals};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Success,
    Info,
    Warning,
    Error,
}

impl AlertLevel {
    fn label(&self) -> &'static str {
        match self {
            AlertLevel::Success => "SUCCESS",
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Error => "ERROR",
        }
    }
}

/// Escape the three characters Telegram's HTML mode treats specially.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn format_signal(signal: &Signal) -> String {
    let d = price_decimals(signal.entry);
    let mut lines = vec![
        format!(
            "<b>NEW SIGNAL: {} {} {}</b>",
            signal.side,
            escape_html(&signal.symbol),
            signal.timeframe
        ),
        format!("Entry: {}", format_price(signal.entry, d)),
        format!("Stop Loss: {}", format_price(signal.stop_loss, d)),
    ];
    for (i, tp) in signal.take_profits.iter().enumerate() {
        lines.push(format!("TP{}: {}", i + 1, format_price(*tp, d)));
    }
    lines.push(format!("Risk/Reward: 1:{:.2}", signal.rr_ratio));
    lines.push(format!("Confidence: {:.0}%", signal.confidence * 100.0));
    if let Some(size) = signal.position_size {
        lines.push(format!("Position: {:.3} lots", size));
    }
    if let Some(score) = signal.session_score {
        lines.push(format!("Session score: {:.2}", score));
    }
    if let (Some(probability), Some(ev)) = (signal.tp_probability, signal.expected_value) {
        lines.push(format!("TP1 probability: {:.1}% (EV {:+.2})", probability, ev));
    }
    lines.push(format!(
        "Support / Resistance: {} / {}",
        format_price(signal.support, d),
        format_price(signal.resistance, d)
    ));
    lines.push(format!("Time: {} UTC", signal.generated_at.format("%Y-%m-%d %H:%M:%S")));
    lines.join("\n")
}

pub fn format_outcome(outcome: &Outcome) -> String {
    let signal = &outcome.signal;
    let d = price_decimals(signal.entry);
    let state = if outcome.closed { "closed" } else { "running" };
    format!(
        "<b>{}: {} {} {}</b>\nEntry: {} Exit: {}\nP&amp;L: {:+.2}% ({})",
        outcome.status,
        signal.side,
        escape_html(&signal.symbol),
        signal.timeframe,
        format_price(signal.entry, d),
        format_price(outcome.price, d),
        outcome.pnl_pct,
        state
    )
}

pub fn format_system(level: AlertLevel, text: &str) -> String {
    format!("<b>{}</b>: {}", level.label(), escape_html(text))
}

pub fn format_performance(perf: &Performance, at: DateTime<Utc>) -> String {
    format!(
        "<b>Performance report {}</b>\nSignals closed: {}\nWins: {} | Losses: {} | Expired: {}\nWin rate: {:.1}%\nTotal P&amp;L: {:+.2}%\nAverage per signal: {:+.2}%",
        at.format("%Y-%m-%d"),
        perf.total,
        perf.wins,
        perf.losses,
        perf.expired,
        perf.win_rate,
        perf.total_pnl_pct,
        perf.avg_pnl_pct
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalStatus;
    use crate::signal::fixtures::buy_signal;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a < b && c > d"), "a &lt; b &amp;&amp; c &gt; d");
    }

    #[test]
    fn test_signal_message() {
        let mut signal = buy_signal("XAUUSD", 2_000.0, 1_990.0);
        signal.position_size = Some(0.25);
        let text = format_signal(&signal);
        assert!(text.starts_with("<b>NEW SIGNAL: BUY XAUUSD M5</b>"));
        assert!(text.contains("Entry: 2000.00"));
        assert!(text.contains("Stop Loss: 1990.00"));
        assert!(text.contains("TP5: 2045.00"));
        assert!(text.contains("Position: 0.250 lots"));
        assert!(text.contains("Confidence: 70%"));
        assert!(!text.contains("TP1 probability"));
        assert!(text.is_ascii());

        signal.tp_probability = Some(62.4);
        signal.expected_value = Some(3.1);
        assert!(format_signal(&signal).contains("TP1 probability: 62.4% (EV +3.10)"));
    }

    #[test]
    fn test_outcome_and_system_messages() {
        let signal = buy_signal("BTCUSD", 100.0, 95.0);
        let outcome = Outcome {
            status: SignalStatus::SlHit,
            price: 95.0,
            pnl_pct: -5.0,
            closed: true,
            signal,
        };
        let text = format_outcome(&outcome);
        assert!(text.contains("SL HIT: BUY BTCUSD M5"));
        assert!(text.contains("-5.00%"));

        assert_eq!(
            format_system(AlertLevel::Warning, "feed <down>"),
            "<b>WARNING</b>: feed &lt;down&gt;"
        );
    }

    #[test]
    fn test_performance_message() {
        let perf = Performance {
            total: 4,
            wins: 3,
            losses: 1,
            expired: 0,
            win_rate: 75.0,
            total_pnl_pct: 6.5,
            avg_pnl_pct: 1.625,
        };
        let text = format_performance(&perf, Utc::now());
        assert!(text.contains("Win rate: 75.0%"));
        assert!(text.contains("Total P&amp;L: +6.50%"));
    }
}
