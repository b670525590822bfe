// Wall-clock access for TTL checks and week-date computation

use chrono::{DateTime, Local, NaiveDate, Utc};
#[cfg(test)]
use parking_lot::Mutex;

pub trait Clock: Send + Sync + 'static {
    // Current instant, used for cache timestamps and TTL comparisons
    fn now(&self) -> DateTime<Utc>;

    // Calendar date the menu weeks are computed from
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock that only moves when told to. `today()` is the UTC date of `now()`.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn today(&self) -> NaiveDate {
        self.now.lock().date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2025, 6, 11, 23, 30, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 6, 11).unwrap());

        clock.advance(chrono::Duration::hours(1));
        assert_eq!(clock.now(), start + chrono::Duration::hours(1));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 6, 12).unwrap());
    }
}
