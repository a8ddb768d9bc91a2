use chrono::NaiveDateTime;

/// Wall-clock source for cooldown and attendance decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local time, matching the timestamps stored in the employee table.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;
