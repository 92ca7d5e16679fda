use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Market session phase in exchange (ET) time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketPhase {
    Closed,
    Premarket,
    Regular,
    AfterHours,
}

impl MarketPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketPhase::Closed => "CLOSED",
            MarketPhase::Premarket => "PREMARKET",
            MarketPhase::Regular => "REGULAR",
            MarketPhase::AfterHours => "AFTERHOURS",
        }
    }
}

// Session boundaries in minutes since ET midnight.
const PREMARKET_OPEN_MIN: u32 = 4 * 60;
const REGULAR_OPEN_MIN: u32 = 9 * 60 + 30;
const REGULAR_CLOSE_MIN: u32 = 16 * 60;
const AFTERHOURS_CLOSE_MIN: u32 = 20 * 60;

/// Deterministic market clock for the fixed America/New_York exchange
/// timezone. Holidays are injected; DST comes from the tz database.
#[derive(Debug, Clone, Default)]
pub struct MarketClock {
    holidays: HashSet<NaiveDate>,
}

impl MarketClock {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// Weekday and not a holiday.
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Phase at the given instant.
    pub fn phase(&self, now: DateTime<Utc>) -> MarketPhase {
        let et = now.with_timezone(&New_York);
        if !self.is_trading_day(et.date_naive()) {
            return MarketPhase::Closed;
        }

        let minutes = minutes_since_midnight(&et);
        if (PREMARKET_OPEN_MIN..REGULAR_OPEN_MIN).contains(&minutes) {
            MarketPhase::Premarket
        } else if (REGULAR_OPEN_MIN..REGULAR_CLOSE_MIN).contains(&minutes) {
            MarketPhase::Regular
        } else if (REGULAR_CLOSE_MIN..AFTERHOURS_CLOSE_MIN).contains(&minutes) {
            MarketPhase::AfterHours
        } else {
            MarketPhase::Closed
        }
    }

    /// Instant of the next phase boundary strictly after `now`.
    pub fn next_transition(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let et = now.with_timezone(&New_York);
        let today = et.date_naive();

        if self.is_trading_day(today) {
            let minutes = minutes_since_midnight(&et);
            for boundary in [
                PREMARKET_OPEN_MIN,
                REGULAR_OPEN_MIN,
                REGULAR_CLOSE_MIN,
                AFTERHOURS_CLOSE_MIN,
            ] {
                if minutes < boundary {
                    return instant_at(today, boundary);
                }
            }
        }

        // Past today's close (or today is not a trading day): next trading
        // day's premarket open.
        let mut date = today + Duration::days(1);
        while !self.is_trading_day(date) {
            date += Duration::days(1);
        }
        instant_at(date, PREMARKET_OPEN_MIN)
    }

    /// Instant of the next regular-session open strictly after `now`.
    pub fn next_open(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let et = now.with_timezone(&New_York);
        let today = et.date_naive();

        if self.is_trading_day(today) && minutes_since_midnight(&et) < REGULAR_OPEN_MIN {
            return instant_at(today, REGULAR_OPEN_MIN);
        }

        let mut date = today + Duration::days(1);
        while !self.is_trading_day(date) {
            date += Duration::days(1);
        }
        instant_at(date, REGULAR_OPEN_MIN)
    }
}

fn minutes_since_midnight(et: &DateTime<chrono_tz::Tz>) -> u32 {
    use chrono::Timelike;
    et.hour() * 60 + et.minute()
}

/// Resolve a (date, minutes-past-midnight) pair in ET to UTC. Session
/// boundaries never land inside a DST gap (transitions are at 02:00 ET), so
/// `earliest` is always populated; the fallback covers pathological tz data.
fn instant_at(date: NaiveDate, minutes: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_num_seconds_from_midnight_opt(minutes * 60, 0)
        .unwrap_or(NaiveTime::MIN);
    let naive = date.and_time(time);
    New_York
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn et(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Utc> {
        New_York
            .with_ymd_and_hms(y, m, d, hh, mm, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_regular_session_window() {
        let clock = MarketClock::default();
        // Monday 2025-06-02
        assert_eq!(clock.phase(et(2025, 6, 2, 9, 29)), MarketPhase::Premarket);
        assert_eq!(clock.phase(et(2025, 6, 2, 9, 30)), MarketPhase::Regular);
        assert_eq!(clock.phase(et(2025, 6, 2, 15, 59)), MarketPhase::Regular);
        assert_eq!(clock.phase(et(2025, 6, 2, 16, 0)), MarketPhase::AfterHours);
        assert_eq!(clock.phase(et(2025, 6, 2, 19, 59)), MarketPhase::AfterHours);
        assert_eq!(clock.phase(et(2025, 6, 2, 20, 0)), MarketPhase::Closed);
        assert_eq!(clock.phase(et(2025, 6, 2, 3, 59)), MarketPhase::Closed);
        assert_eq!(clock.phase(et(2025, 6, 2, 4, 0)), MarketPhase::Premarket);
    }

    #[test]
    fn test_weekend_closed() {
        let clock = MarketClock::default();
        // Saturday 2025-06-07 mid-session hours
        assert_eq!(clock.phase(et(2025, 6, 7, 11, 0)), MarketPhase::Closed);
        assert_eq!(clock.phase(et(2025, 6, 8, 11, 0)), MarketPhase::Closed);
    }

    #[test]
    fn test_holiday_closed_all_day() {
        // Wednesday 2025-06-18 injected as a holiday
        let holiday = NaiveDate::from_ymd_opt(2025, 6, 18).unwrap();
        let clock = MarketClock::new([holiday]);
        assert!(!clock.is_trading_day(holiday));
        assert_eq!(clock.phase(et(2025, 6, 18, 5, 0)), MarketPhase::Closed);
        assert_eq!(clock.phase(et(2025, 6, 18, 11, 0)), MarketPhase::Closed);
        assert_eq!(clock.phase(et(2025, 6, 18, 18, 0)), MarketPhase::Closed);
    }

    #[test]
    fn test_next_transition_within_day() {
        let clock = MarketClock::default();
        let now = et(2025, 6, 2, 10, 0);
        assert_eq!(clock.next_transition(now), et(2025, 6, 2, 16, 0));

        let premarket = et(2025, 6, 2, 5, 0);
        assert_eq!(clock.next_transition(premarket), et(2025, 6, 2, 9, 30));
    }

    #[test]
    fn test_next_transition_rolls_over_weekend() {
        let clock = MarketClock::default();
        // Friday 2025-06-06 after the extended close
        let now = et(2025, 6, 6, 21, 0);
        assert_eq!(clock.next_transition(now), et(2025, 6, 9, 4, 0));
    }

    #[test]
    fn test_next_open_skips_holiday() {
        let holiday = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();
        let clock = MarketClock::new([holiday]);
        let now = et(2025, 6, 2, 17, 0);
        assert_eq!(clock.next_open(now), et(2025, 6, 4, 9, 30));
    }
}
