use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Mutex;

use shiva_core::Clock;

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Clock set to a wall-clock time in Toronto.
    pub fn toronto(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Self {
        Self::new(toronto(year, month, day, hour, minute))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// UTC instant of a Toronto wall-clock time. Panics on a nonexistent local
/// time, which only a broken test would ask for.
pub fn toronto(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    let tz: Tz = chrono_tz::America::Toronto;
    tz.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| panic!("nonexistent Toronto time {year}-{month}-{day} {hour}:{minute}"))
}
