//! Date and local-time rules for the shiva window.
//!
//! Meal dates are plain calendar dates. Notification windows and the Shabbat
//! send pause are evaluated in one configured IANA zone.

use anyhow::{anyhow, Result};
use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc, Weekday,
};
use chrono_tz::Tz;

/// Longest support window a page may cover, in days between start and end.
pub const MAX_RANGE_DAYS: i64 = 30;

/// Friday and Saturday are treated as Shabbat days for meal coordination.
pub fn is_shabbat_day(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Fri | Weekday::Sat)
}

/// Every date of the closed range `start..=end`.
pub fn dates_between(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Checks `end >= start` and the maximum span.
pub fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<(), &'static str> {
    if end < start {
        return Err("End date must be on or after start date");
    }
    if (end - start).num_days() > MAX_RANGE_DAYS {
        return Err("Shiva period cannot exceed 30 days");
    }
    Ok(())
}

pub fn weekday_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Wall-clock view of an instant in the notification zone.
#[derive(Debug, Clone, Copy)]
pub struct LocalClock {
    tz: Tz,
}

impl LocalClock {
    pub fn new(timezone: &str) -> Result<Self> {
        let tz: Tz = timezone
            .parse()
            .map_err(|e| anyhow!("Invalid timezone {}: {}", timezone, e))?;
        Ok(Self { tz })
    }

    pub fn local(&self, now: DateTime<Utc>) -> NaiveDateTime {
        now.with_timezone(&self.tz).naive_local()
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local(now).date()
    }

    /// UTC instant of local midnight starting `date`.
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_time(NaiveTime::MIN);
        self.tz
            .from_local_datetime(&midnight)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
    }

    /// No sends from Friday 18:00 through Saturday 21:00 local time.
    pub fn in_shabbat_pause(&self, now: DateTime<Utc>) -> bool {
        let local = self.local(now);
        match local.weekday() {
            Weekday::Fri => local.hour() >= 18,
            Weekday::Sat => local.hour() < 21,
            _ => false,
        }
    }
}

pub fn days_ago(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - Duration::days(days)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn friday_and_saturday_are_shabbat_days() {
        // 2026-03-06 is a Friday.
        assert!(is_shabbat_day(date("2026-03-06")));
        assert!(is_shabbat_day(date("2026-03-07")));
        assert!(!is_shabbat_day(date("2026-03-08")));
        assert!(!is_shabbat_day(date("2026-03-05")));
    }

    #[test]
    fn range_is_closed() {
        let days: Vec<_> = dates_between(date("2026-03-01"), date("2026-03-05")).collect();
        assert_eq!(days.len(), 5);
        assert_eq!(days[0], date("2026-03-01"));
        assert_eq!(days[4], date("2026-03-05"));
    }

    #[test]
    fn range_validation() {
        assert!(validate_range(date("2026-03-01"), date("2026-03-01")).is_ok());
        assert!(validate_range(date("2026-03-01"), date("2026-03-31")).is_ok());
        assert!(validate_range(date("2026-03-05"), date("2026-03-01")).is_err());
        assert!(validate_range(date("2026-03-01"), date("2026-04-01")).is_err());
    }

    #[test]
    fn shabbat_pause_window_in_toronto() {
        let clock = LocalClock::new("America/Toronto").unwrap();
        // Friday 2026-03-06 17:59 EST = 22:59 UTC
        let before = Utc.with_ymd_and_hms(2026, 3, 6, 22, 59, 0).unwrap();
        // Friday 18:00 EST = 23:00 UTC
        let start = Utc.with_ymd_and_hms(2026, 3, 6, 23, 0, 0).unwrap();
        // Saturday 20:59 EST = Sunday 01:59 UTC
        let late = Utc.with_ymd_and_hms(2026, 3, 8, 1, 59, 0).unwrap();
        // Saturday 21:00 EST = Sunday 02:00 UTC
        let after = Utc.with_ymd_and_hms(2026, 3, 8, 2, 0, 0).unwrap();

        assert!(!clock.in_shabbat_pause(before));
        assert!(clock.in_shabbat_pause(start));
        assert!(clock.in_shabbat_pause(late));
        assert!(!clock.in_shabbat_pause(after));
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert!(LocalClock::new("Mars/Olympus").is_err());
    }

    #[test]
    fn start_of_day_is_local_midnight() {
        let clock = LocalClock::new("America/Toronto").unwrap();
        let start = clock.start_of_day(date("2026-03-02"));
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 2, 5, 0, 0).unwrap());
    }
}
