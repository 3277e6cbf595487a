//! Market session oracle
//! NYSE session phases in Eastern Time with a holiday calendar, plus the
//! pre-market context snapshot. This is the only component allowed to hit
//! the quote capability for off-hours data.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};

use crate::data::DataResult;
use crate::providers::QuoteProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    PreMarket,
    Regular,
    PostMarket,
    Closed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::PreMarket => "PRE_MARKET",
            SessionPhase::Regular => "REGULAR",
            SessionPhase::PostMarket => "POST_MARKET",
            SessionPhase::Closed => "CLOSED",
        }
    }
}

/// Pre-market snapshot used by the analyst's entry advice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremarketContext {
    pub ticker: String,
    pub prev_close: f64,
    pub premarket_last: f64,
    /// `(last - prev_close) / prev_close`, in percent.
    pub premarket_gap_pct: f64,
    pub minutes_until_open: Option<i64>,
}

fn market_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).expect("valid constant time")
}

fn market_close() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).expect("valid constant time")
}

fn premarket_start() -> NaiveTime {
    NaiveTime::from_hms_opt(4, 0, 0).expect("valid constant time")
}

fn postmarket_end() -> NaiveTime {
    NaiveTime::from_hms_opt(20, 0, 0).expect("valid constant time")
}

fn nth_weekday_of_month(year: i32, month: u32, weekday: Weekday, nth: u32) -> Option<NaiveDate> {
    let mut count = 0;
    for day in 1..=31 {
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            break;
        };
        if date.weekday() == weekday {
            count += 1;
            if count == nth {
                return Some(date);
            }
        }
    }
    None
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    for day in (1..=31).rev() {
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            continue;
        };
        if date.weekday() == weekday {
            return Some(date);
        }
    }
    None
}

/// Good Friday moves with Easter; a small table covers the supported range.
fn good_friday(year: i32) -> Option<NaiveDate> {
    match year {
        2024 => NaiveDate::from_ymd_opt(2024, 3, 29),
        2025 => NaiveDate::from_ymd_opt(2025, 4, 18),
        2026 => NaiveDate::from_ymd_opt(2026, 4, 3),
        2027 => NaiveDate::from_ymd_opt(2027, 3, 26),
        _ => None,
    }
}

/// NYSE full-day holidays for a year (early closes are not modeled).
pub fn is_market_holiday(date: NaiveDate) -> bool {
    let year = date.year();

    // Fixed-date holidays count only when they land on a weekday.
    for (month, day) in [(1, 1), (6, 19), (7, 4), (12, 25)] {
        if let Some(holiday) = NaiveDate::from_ymd_opt(year, month, day) {
            if holiday == date && holiday.weekday().num_days_from_monday() < 5 {
                return true;
            }
        }
    }

    [
        nth_weekday_of_month(year, 1, Weekday::Mon, 3),  // MLK
        nth_weekday_of_month(year, 2, Weekday::Mon, 3),  // Presidents' Day
        last_weekday_of_month(year, 5, Weekday::Mon),    // Memorial Day
        nth_weekday_of_month(year, 9, Weekday::Mon, 1),  // Labor Day
        nth_weekday_of_month(year, 11, Weekday::Thu, 4), // Thanksgiving
        good_friday(year),
    ]
    .iter()
    .any(|holiday| *holiday == Some(date))
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn is_trading_day(date: NaiveDate) -> bool {
    !is_weekend(date) && !is_market_holiday(date)
}

/// Count trading days strictly between two dates.
pub fn trading_days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    let mut count = 0;
    let mut day = from;
    while day < to {
        day += chrono::Duration::days(1);
        if is_trading_day(day) {
            count += 1;
        }
    }
    count
}

/// Session phase for a wall-clock instant.
pub fn session_phase(now: DateTime<Utc>) -> SessionPhase {
    let et = now.with_timezone(&New_York);
    let date = et.date_naive();

    if !is_trading_day(date) {
        return SessionPhase::Closed;
    }

    let time = et.time();
    if time >= premarket_start() && time < market_open() {
        SessionPhase::PreMarket
    } else if time >= market_open() && time < market_close() {
        SessionPhase::Regular
    } else if time >= market_close() && time < postmarket_end() {
        SessionPhase::PostMarket
    } else {
        SessionPhase::Closed
    }
}

/// Minutes until today's open; only meaningful during pre-market.
pub fn minutes_until_open(now: DateTime<Utc>) -> Option<i64> {
    if session_phase(now) != SessionPhase::PreMarket {
        return None;
    }
    let et = now.with_timezone(&New_York);
    let open = New_York
        .from_local_datetime(&et.date_naive().and_time(market_open()))
        .single()?;
    Some((open - et).num_minutes())
}

/// Whether `now` falls within regular trading hours (optionally counting
/// pre-market as tradable).
pub fn within_trading_hours(now: DateTime<Utc>, allow_premarket: bool) -> bool {
    match session_phase(now) {
        SessionPhase::Regular => true,
        SessionPhase::PreMarket => allow_premarket,
        _ => false,
    }
}

/// Fetch the pre-market snapshot for a ticker and derive the gap.
pub async fn premarket_context(
    provider: &dyn QuoteProvider,
    ticker: &str,
    now: DateTime<Utc>,
) -> DataResult<PremarketContext> {
    let quote = provider.get_premarket(ticker).await?;

    let gap_pct = if quote.prev_close > 0.0 {
        (quote.last - quote.prev_close) / quote.prev_close * 100.0
    } else {
        0.0
    };

    Ok(PremarketContext {
        ticker: ticker.to_string(),
        prev_close: quote.prev_close,
        premarket_last: quote.last,
        premarket_gap_pct: gap_pct,
        minutes_until_open: minutes_until_open(now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_regular_session_weekday() {
        // Monday 2025-01-06, 10:00 ET = 15:00 UTC
        assert_eq!(session_phase(utc("2025-01-06T15:00:00Z")), SessionPhase::Regular);
    }

    #[test]
    fn test_premarket_phase_and_countdown() {
        // Monday 2025-01-06, 08:30 ET = 13:30 UTC
        let now = utc("2025-01-06T13:30:00Z");
        assert_eq!(session_phase(now), SessionPhase::PreMarket);
        assert_eq!(minutes_until_open(now), Some(60));
    }

    #[test]
    fn test_post_market_and_closed() {
        // Monday 2025-01-06, 17:00 ET = 22:00 UTC
        assert_eq!(session_phase(utc("2025-01-06T22:00:00Z")), SessionPhase::PostMarket);
        // Monday 2025-01-06, 22:00 ET = 03:00 UTC next day
        assert_eq!(session_phase(utc("2025-01-07T03:00:00Z")), SessionPhase::Closed);
    }

    #[test]
    fn test_weekend_closed() {
        // Saturday 2025-01-04, 10:00 ET
        assert_eq!(session_phase(utc("2025-01-04T15:00:00Z")), SessionPhase::Closed);
    }

    #[test]
    fn test_holiday_calendar() {
        assert!(is_market_holiday(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        assert!(is_market_holiday(NaiveDate::from_ymd_opt(2025, 1, 20).unwrap())); // MLK
        assert!(is_market_holiday(NaiveDate::from_ymd_opt(2025, 2, 17).unwrap())); // Presidents
        assert!(is_market_holiday(NaiveDate::from_ymd_opt(2025, 4, 18).unwrap())); // Good Friday
        assert!(is_market_holiday(NaiveDate::from_ymd_opt(2025, 5, 26).unwrap())); // Memorial
        assert!(is_market_holiday(NaiveDate::from_ymd_opt(2025, 9, 1).unwrap())); // Labor
        assert!(is_market_holiday(NaiveDate::from_ymd_opt(2025, 11, 27).unwrap())); // Thanksgiving
        assert!(is_market_holiday(NaiveDate::from_ymd_opt(2025, 12, 25).unwrap()));

        assert!(!is_market_holiday(NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()));
        assert!(!is_market_holiday(NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()));
    }

    #[test]
    fn test_holiday_session_closed() {
        // MLK Day 2025 at 10:00 ET
        assert_eq!(session_phase(utc("2025-01-20T15:00:00Z")), SessionPhase::Closed);
    }

    #[test]
    fn test_trading_days_between_skips_weekend() {
        // Friday 2025-01-03 -> Tuesday 2025-01-07: Mon + Tue = 2 trading days
        let from = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 1, 7).unwrap();
        assert_eq!(trading_days_between(from, to), 2);
    }

    #[test]
    fn test_within_trading_hours_premarket_flag() {
        let premarket = utc("2025-01-06T13:30:00Z");
        assert!(!within_trading_hours(premarket, false));
        assert!(within_trading_hours(premarket, true));
    }
}
