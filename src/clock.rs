use chrono::{Local, NaiveDate, Utc};
use parking_lot::RwLock;

/// Source of the server's calendar date. Play dates are never taken from the client.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;

    fn now_ts(&self) -> i64 {
        Utc::now().timestamp()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock that stays on one day until told otherwise.
#[derive(Debug)]
pub struct ManualClock {
    today: RwLock<NaiveDate>,
}

impl ManualClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: RwLock::new(today),
        }
    }

    pub fn set(&self, day: NaiveDate) {
        *self.today.write() = day;
    }

    pub fn advance_days(&self, days: u64) {
        let mut guard = self.today.write();
        if let Some(next) = guard.checked_add_days(chrono::Days::new(days)) {
            *guard = next;
        }
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        *self.today.read()
    }
}
