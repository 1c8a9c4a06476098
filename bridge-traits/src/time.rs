//! Wall-clock time source.
//!
//! Cache timestamps and retention checks read the time through [`Clock`] so
//! tests can move time forward without sleeping.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Seconds since the Unix epoch.
    fn unix_timestamp(&self) -> i64 {
        self.now().timestamp()
    }
}

/// [`Clock`] backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
