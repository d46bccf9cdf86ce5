//! Time sources
//!
//! All stored timestamps are UTC. Schedules (light hours, watering time) are
//! evaluated on wall-clock time in the node's schedule zone.

use chrono::{DateTime, FixedOffset, Local, NaiveTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Zone in which schedule hours are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleZone {
    Local,
    Fixed(FixedOffset),
}

impl ScheduleZone {
    /// None or an out-of-range offset means local time
    pub fn from_offset_minutes(minutes: Option<i32>) -> Self {
        minutes
            .and_then(|m| FixedOffset::east_opt(m * 60))
            .map(ScheduleZone::Fixed)
            .unwrap_or(ScheduleZone::Local)
    }

    pub fn time_of_day(&self, at: DateTime<Utc>) -> NaiveTime {
        match self {
            ScheduleZone::Local => at.with_timezone(&Local).time(),
            ScheduleZone::Fixed(offset) => at.with_timezone(offset).time(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_fixed_zone_shifts_hours() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 23, 30, 0).unwrap();
        let zone = ScheduleZone::from_offset_minutes(Some(120));
        assert_eq!(zone.time_of_day(at).hour(), 1);
        assert_eq!(ScheduleZone::from_offset_minutes(Some(0)).time_of_day(at).hour(), 23);
        assert_eq!(ScheduleZone::from_offset_minutes(None), ScheduleZone::Local);
    }
}
