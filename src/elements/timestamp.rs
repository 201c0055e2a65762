use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock instant used to mark metric epochs and planner trigger cutoffs. Serialized as
/// `[secs, subsec_nanos]`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64, u32);

impl Timestamp {
    const NANOS_PER_SEC: i64 = 1_000_000_000;
    pub const ZERO: Timestamp = Timestamp(0, 0);

    pub fn now() -> Self {
        Self::from_datetime(&Utc::now())
    }

    pub fn from_datetime(datetime: &DateTime<Utc>) -> Self {
        Self::new(datetime.timestamp(), datetime.timestamp_subsec_nanos())
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs, 0)
    }

    pub const fn new(secs: i64, subsec_nanos: u32) -> Self {
        let carry = (subsec_nanos as i64) / Self::NANOS_PER_SEC;
        Self(secs + carry, (subsec_nanos as i64 % Self::NANOS_PER_SEC) as u32)
    }

    pub fn as_f64(&self) -> f64 {
        (self.0 as f64) + ((self.1 as f64) / (Self::NANOS_PER_SEC as f64))
    }

    pub const fn as_secs(&self) -> i64 {
        self.0
    }

    pub const fn as_nanos(&self) -> i128 {
        (self.0 as i128) * (Self::NANOS_PER_SEC as i128) + self.1 as i128
    }

    pub fn as_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.0, self.1).single().unwrap_or_else(Utc::now)
    }

    fn from_nanos(nanos: i128) -> Self {
        let per_sec = Self::NANOS_PER_SEC as i128;
        let secs = nanos.div_euclid(per_sec) as i64;
        let subsec = nanos.rem_euclid(per_sec) as u32;
        Self(secs, subsec)
    }

    /// Elapsed time since `earlier`, or zero if `earlier` is not before this timestamp.
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        let delta = self.as_nanos() - earlier.as_nanos();
        if delta <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(delta as u64)
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            write!(f, "({},{})", self.0, self.1)
        } else {
            write!(f, "{}", self.as_utc())
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(that: DateTime<Utc>) -> Self {
        Self::from_datetime(&that)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(ts: Timestamp) -> Self {
        ts.as_utc()
    }
}

impl std::ops::Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        Self::from_nanos(self.as_nanos() + rhs.as_nanos() as i128)
    }
}

impl std::ops::Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Self::Output {
        Self::from_nanos(self.as_nanos() - rhs.as_nanos() as i128)
    }
}
