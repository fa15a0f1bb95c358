use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    Tokyo,
    London,
    NewYork,
    Sydney,
}

impl Session {
    pub const ALL: [Session; 4] = [Session::Tokyo, Session::London, Session::NewYork, Session::Sydney];

    /// Opening and closing hour (UTC, both inclusive). Sydney wraps midnight.
    pub fn hours(&self) -> (u32, u32) {
        match self {
            Session::Tokyo => (0, 9),
            Session::London => (8, 17),
            Session::NewYork => (13, 22),
            Session::Sydney => (22, 7),
        }
    }

    pub fn is_active(&self, hour: u32) -> bool {
        let (start, end) = self.hours();
        if start > end {
            hour >= start || hour <= end
        } else {
            (start..=end).contains(&hour)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overlap {
    LondonNy,
    TokyoLondon,
    NySydney,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub hour: u32,
    pub active: Vec<Session>,
    pub overlaps: Vec<Overlap>,
    pub priority_score: f64,
    pub is_prime_time: bool,
    pub volatility_expected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionMultipliers {
    pub probability: f64,
    pub confidence_boost: f64,
    pub position_size_factor: f64,
    pub take_profit_adjustment: f64,
    pub optimal_for_symbol: bool,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionAction {
    TradeAggressively,
    TradeNormally,
    TradeConservatively,
    AvoidTrading,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub score: f64,
    pub action: SessionAction,
    pub multipliers: SessionMultipliers,
    pub next_optimal: NextSession,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextSession {
    pub session: Session,
    pub hours_until: u32,
    pub starts_at: DateTime<Utc>,
}

struct SymbolProfile {
    best: &'static [Session],
    high_volatility: &'static [Session],
    london_ny_boost: f64,
    tokyo_london_boost: f64,
}

fn profile(symbol: &str) -> Option<SymbolProfile> {
    match symbol {
        "BTCUSD" => Some(SymbolProfile {
            best: &[Session::NewYork, Session::London],
            high_volatility: &[Session::NewYork],
            london_ny_boost: 1.3,
            tokyo_london_boost: 1.1,
        }),
        "XAUUSD" => Some(SymbolProfile {
            best: &[Session::London, Session::NewYork],
            high_volatility: &[Session::London, Session::NewYork],
            london_ny_boost: 1.4,
            tokyo_london_boost: 1.2,
        }),
        _ => None,
    }
}

pub fn is_crypto(symbol: &str) -> bool {
    matches!(symbol, "BTCUSD" | "ETHUSD" | "LTCUSD") || symbol.ends_with("USDT")
}

/// Market session arithmetic on UTC hours. Stateless: every call takes the instant.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionClock;

impl SessionClock {
    pub fn info(&self, at: DateTime<Utc>) -> SessionInfo {
        let hour = at.hour();
        let active: Vec<Session> = Session::ALL.into_iter().filter(|s| s.is_active(hour)).collect();
        let has = |s: Session| active.contains(&s);

        let mut overlaps = Vec::new();
        if has(Session::London) && has(Session::NewYork) {
            overlaps.push(Overlap::LondonNy);
        }
        if has(Session::Tokyo) && has(Session::London) {
            overlaps.push(Overlap::TokyoLondon);
        }
        if has(Session::NewYork) && has(Session::Sydney) {
            overlaps.push(Overlap::NySydney);
        }

        let priority_score = if overlaps.contains(&Overlap::LondonNy) {
            1.0
        } else if has(Session::NewYork) {
            0.9
        } else if has(Session::London) {
            0.8
        } else if overlaps.contains(&Overlap::TokyoLondon) {
            0.7
        } else if has(Session::Tokyo) {
            0.6
        } else {
            0.5
        };
        let volatility_expected = has(Session::NewYork) || has(Session::London);

        SessionInfo {
            hour,
            volatility_expected,
            active,
            overlaps,
            priority_score,
            is_prime_time: priority_score >= 0.8,
        }
    }

    pub fn multipliers(&self, symbol: &str, at: DateTime<Utc>) -> SessionMultipliers {
        let info = self.info(at);
        let profile = profile(symbol);
        let mut m = SessionMultipliers {
            probability: 1.0,
            confidence_boost: 0.0,
            position_size_factor: 1.0,
            take_profit_adjustment: 1.0,
            optimal_for_symbol: false,
            notes: Vec::new(),
        };

        if let Some(p) = &profile {
            if p.best.iter().any(|s| info.active.contains(s)) {
                m.optimal_for_symbol = true;
                m.probability *= 1.2;
                m.confidence_boost += 0.05;
                m.notes.push(format!("{} performs well during the current session", symbol));
            }
            for overlap in &info.overlaps {
                let boost = match overlap {
                    Overlap::LondonNy => p.london_ny_boost,
                    Overlap::TokyoLondon => p.tokyo_london_boost,
                    Overlap::NySydney => continue,
                };
                m.probability *= boost;
                m.position_size_factor *= boost.min(1.5);
                m.notes.push(format!("{:?} overlap active (+{:.0}% boost)", overlap, (boost - 1.0) * 100.0));
            }
        }

        if info.volatility_expected {
            let in_volatile = profile
                .as_ref()
                .is_some_and(|p| p.high_volatility.iter().any(|s| info.active.contains(s)));
            if in_volatile {
                m.take_profit_adjustment *= 1.3;
                m.notes.push("High volatility expected, TPs widened".to_string());
            } else {
                m.probability *= 0.9;
                m.notes.push("Volatility expected outside the symbol's best session".to_string());
            }
        }

        if info.is_prime_time {
            m.confidence_boost += 0.03;
            m.notes.push("Prime trading time".to_string());
        }
        if info.priority_score < 0.6 {
            m.probability *= 0.8;
            m.position_size_factor *= 0.7;
            m.notes.push("Low activity period, reduced exposure".to_string());
        }
        m
    }

    pub fn recommendation(&self, symbol: &str, at: DateTime<Utc>) -> Recommendation {
        let info = self.info(at);
        let multipliers = self.multipliers(symbol, at);
        let score = info.priority_score * 0.6 + (multipliers.probability - 1.0) * 0.4;
        let action = if score >= 0.8 {
            SessionAction::TradeAggressively
        } else if score >= 0.6 {
            SessionAction::TradeNormally
        } else if score >= 0.4 {
            SessionAction::TradeConservatively
        } else {
            SessionAction::AvoidTrading
        };
        Recommendation {
            score,
            action,
            multipliers,
            next_optimal: self.next_optimal(symbol, at),
        }
    }

    /// Nearest opening of one of the symbol's best sessions (London/New York by default).
    pub fn next_optimal(&self, symbol: &str, at: DateTime<Utc>) -> NextSession {
        let best: &[Session] = match profile(symbol) {
            Some(p) => p.best,
            None => &[Session::London, Session::NewYork],
        };
        let hour = at.hour();
        let (session, hours_until) = best
            .iter()
            .map(|s| {
                let start = s.hours().0;
                let until = if start > hour { start - hour } else { 24 - hour + start };
                (*s, until)
            })
            .min_by_key(|(_, until)| *until)
            .unwrap_or((Session::London, 24));
        let top_of_hour = at - Duration::minutes(at.minute() as i64) - Duration::seconds(at.second() as i64);
        NextSession {
            session,
            hours_until,
            starts_at: top_of_hour + Duration::hours(hours_until as i64),
        }
    }

    /// Crypto trades around the clock; everything else follows the FX week
    /// (Sunday 22:00 UTC to Friday 22:00 UTC).
    pub fn is_market_open(&self, symbols: &[String], at: DateTime<Utc>) -> bool {
        if symbols.iter().any(|s| is_crypto(s)) {
            return true;
        }
        let hour = at.hour();
        match at.weekday() {
            Weekday::Sat => false,
            Weekday::Sun => hour >= 22,
            Weekday::Fri => hour < 22,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        // 2024-01-01 is a Monday
        Utc.with_ymd_and_hms(2024, 1, day, hour, 30, 0).unwrap()
    }

    #[test]
    fn test_sessions_and_overlaps() {
        let clock = SessionClock;
        let info = clock.info(at(2, 14));
        assert_eq!(info.active, vec![Session::London, Session::NewYork]);
        assert_eq!(info.overlaps, vec![Overlap::LondonNy]);
        assert_eq!(info.priority_score, 1.0);
        assert!(info.is_prime_time);

        let info = clock.info(at(2, 8));
        assert_eq!(info.overlaps, vec![Overlap::TokyoLondon]);
        assert_eq!(info.priority_score, 0.8);

        let info = clock.info(at(2, 3));
        assert_eq!(info.active, vec![Session::Tokyo, Session::Sydney]);
        assert_eq!(info.priority_score, 0.6);
        assert!(!info.volatility_expected);
    }

    #[test]
    fn test_sydney_wraps_midnight() {
        assert!(Session::Sydney.is_active(23));
        assert!(Session::Sydney.is_active(7));
        assert!(!Session::Sydney.is_active(8));
        let info = SessionClock.info(at(2, 22));
        assert!(info.overlaps.contains(&Overlap::NySydney));
    }

    #[test]
    fn test_multipliers_for_gold_in_overlap() {
        let m = SessionClock.multipliers("XAUUSD", at(2, 14));
        // 1.2 best session * 1.4 overlap
        assert!((m.probability - 1.68).abs() < 1e-9);
        assert!((m.confidence_boost - 0.08).abs() < 1e-9);
        assert!((m.position_size_factor - 1.4).abs() < 1e-9);
        assert_eq!(m.take_profit_adjustment, 1.3);
        assert!(m.optimal_for_symbol);
    }

    #[test]
    fn test_recommendation_ladder() {
        let clock = SessionClock;
        let busy = clock.recommendation("XAUUSD", at(2, 14));
        assert_eq!(busy.action, SessionAction::TradeAggressively);

        // 23:30 UTC: Sydney only, priority 0.5, probability 0.8
        let quiet = clock.recommendation("EURUSD", at(2, 23));
        assert!((quiet.score - 0.22).abs() < 1e-9);
        assert_eq!(quiet.action, SessionAction::AvoidTrading);
    }

    #[test]
    fn test_next_optimal_session() {
        let next = SessionClock.next_optimal("BTCUSD", at(2, 10));
        assert_eq!(next.session, Session::NewYork);
        assert_eq!(next.hours_until, 3);
        assert_eq!(next.starts_at.hour(), 13);
        assert_eq!(next.starts_at.minute(), 0);
    }

    #[test]
    fn test_market_hours() {
        let clock = SessionClock;
        let fx = vec!["XAUUSD".to_string()];
        assert!(!clock.is_market_open(&fx, at(6, 12))); // Saturday
        assert!(!clock.is_market_open(&fx, at(7, 21))); // Sunday early
        assert!(clock.is_market_open(&fx, at(7, 22))); // Sunday open
        assert!(!clock.is_market_open(&fx, at(5, 22))); // Friday close
        assert!(clock.is_market_open(&fx, at(3, 3)));

        let mixed = vec!["XAUUSD".to_string(), "BTCUSD".to_string()];
        assert!(clock.is_market_open(&mixed, at(6, 12)));
    }
}
