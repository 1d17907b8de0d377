//! Exchange trading hours per security class.
//!
//! Used to decide how aggressively to reconnect after a stream fault: there is
//! no point hammering the broker while every subscribed market is closed.
//! Exchange holidays are not modelled.

use super::instrument::{InstrumentId, SecurityType};
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::America::{Chicago, New_York};
use chrono_tz::Tz;

/// Trading session calendar.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketHours {
    /// Treat pre-market (04:00) through after-hours (20:00) as open for
    /// equities. Options never trade extended hours.
    pub extended_hours: bool,
}

impl MarketHours {
    pub fn new(extended_hours: bool) -> Self {
        Self { extended_hours }
    }

    /// Timezone the instrument's exchange keeps its clock in.
    pub fn timezone(security_type: SecurityType) -> Tz {
        match security_type {
            SecurityType::Equity | SecurityType::Option => New_York,
            SecurityType::Future => Chicago,
        }
    }

    /// Convert a UTC instant into exchange-local time for this class.
    pub fn exchange_time(security_type: SecurityType, at: DateTime<Utc>) -> DateTime<Tz> {
        Self::timezone(security_type).from_utc_datetime(&at.naive_utc())
    }

    /// Whether the exchange for `security_type` is trading at `at`.
    pub fn is_open(&self, security_type: SecurityType, at: DateTime<Utc>) -> bool {
        let local = Self::exchange_time(security_type, at);
        let weekday = local.weekday();
        let time = local.time();

        match security_type {
            SecurityType::Equity | SecurityType::Option => {
                if matches!(weekday, Weekday::Sat | Weekday::Sun) {
                    return false;
                }
                let (open, close) = if self.extended_hours && security_type == SecurityType::Equity
                {
                    (hm(4, 0), hm(20, 0))
                } else {
                    (hm(9, 30), hm(16, 0))
                };
                time >= open && time < close
            }
            SecurityType::Future => {
                // Globex: Sunday 17:00 through Friday 16:00 CT, with a daily
                // 16:00-17:00 maintenance halt.
                let halt = time >= hm(16, 0) && time < hm(17, 0);
                match weekday {
                    Weekday::Sat => false,
                    Weekday::Sun => time >= hm(17, 0),
                    Weekday::Fri => time < hm(16, 0),
                    _ => !halt,
                }
            }
        }
    }

    /// True if at least one instrument's exchange is open at `at`.
    pub fn any_open<'a, I>(&self, instruments: I, at: DateTime<Utc>) -> bool
    where
        I: IntoIterator<Item = &'a InstrumentId>,
    {
        instruments
            .into_iter()
            .any(|instrument| self.is_open(instrument.security_type(), at))
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_equity_regular_session() {
        let hours = MarketHours::default();
        // Wed 2024-07-10, EDT (UTC-4): 14:00 UTC = 10:00 ET
        assert!(hours.is_open(SecurityType::Equity, utc(2024, 7, 10, 14, 0)));
        // 13:00 UTC = 09:00 ET, before the bell
        assert!(!hours.is_open(SecurityType::Equity, utc(2024, 7, 10, 13, 0)));
        // 20:00 UTC = 16:00 ET, closed
        assert!(!hours.is_open(SecurityType::Equity, utc(2024, 7, 10, 20, 0)));
        // Saturday
        assert!(!hours.is_open(SecurityType::Option, utc(2024, 7, 13, 15, 0)));
    }

    #[test]
    fn test_equity_winter_offset() {
        let hours = MarketHours::default();
        // Wed 2024-01-10, EST (UTC-5): 14:45 UTC = 09:45 ET
        assert!(hours.is_open(SecurityType::Equity, utc(2024, 1, 10, 14, 45)));
        // 14:15 UTC = 09:15 ET
        assert!(!hours.is_open(SecurityType::Equity, utc(2024, 1, 10, 14, 15)));
    }

    #[test]
    fn test_extended_hours_only_for_equities() {
        let hours = MarketHours::new(true);
        // 11:00 UTC = 07:00 ET in July
        assert!(hours.is_open(SecurityType::Equity, utc(2024, 7, 10, 11, 0)));
        assert!(!hours.is_open(SecurityType::Option, utc(2024, 7, 10, 11, 0)));
    }

    #[test]
    fn test_futures_week() {
        let hours = MarketHours::default();
        // Sun 2024-07-14 23:00 UTC = 18:00 CT, open
        assert!(hours.is_open(SecurityType::Future, utc(2024, 7, 14, 23, 0)));
        // Sun 2024-07-14 20:00 UTC = 15:00 CT, not yet
        assert!(!hours.is_open(SecurityType::Future, utc(2024, 7, 14, 20, 0)));
        // Tue 21:30 UTC = 16:30 CT maintenance halt
        assert!(!hours.is_open(SecurityType::Future, utc(2024, 7, 16, 21, 30)));
        // Tue 03:00 UTC = Mon 22:00 CT, overnight session
        assert!(hours.is_open(SecurityType::Future, utc(2024, 7, 16, 3, 0)));
        // Fri 2024-07-19 22:00 UTC = 17:00 CT, closed for weekend
        assert!(!hours.is_open(SecurityType::Future, utc(2024, 7, 19, 22, 0)));
    }

    #[test]
    fn test_any_open() {
        let hours = MarketHours::default();
        let instruments = vec![InstrumentId::equity("SPY"), InstrumentId::future("ESU24")];
        // Mon 2024-07-15 02:00 UTC: equities closed, futures open
        assert!(hours.any_open(&instruments, utc(2024, 7, 15, 2, 0)));
        // Saturday: everything closed
        assert!(!hours.any_open(&instruments, utc(2024, 7, 13, 15, 0)));
        assert!(!hours.any_open(&[], utc(2024, 7, 10, 15, 0)));
    }
}
