//! Horloge manuelle pour les tests de planning

use chrono::{DateTime, Duration, TimeZone, Utc};
use growbox_core::clock::Clock;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// 2025-03-01 at the given UTC time
    pub fn at(hour: u32, minute: u32, second: u32) -> Self {
        Self::new(Utc.with_ymd_and_hms(2025, 3, 1, hour, minute, second).unwrap())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
