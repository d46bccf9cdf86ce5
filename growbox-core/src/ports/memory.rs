use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{insert_sorted, ControlStateStore, ReadingsRepository, SettingsRepository, TimeRange};
use crate::error::PersistenceError;
use crate::models::{ActuatorState, SensorSnapshot};

/// In-memory readings. `set_unavailable(true)` makes every call fail, which
/// stands in for a database outage.
#[derive(Debug, Default)]
pub struct MemoryReadings {
    snapshots: Mutex<Vec<SensorSnapshot>>,
    unavailable: AtomicBool,
}

impl MemoryReadings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(PersistenceError::Unavailable("memory readings marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl ReadingsRepository for MemoryReadings {
    fn append(&self, snapshot: &SensorSnapshot) -> Result<(), PersistenceError> {
        self.check()?;
        insert_sorted(&mut self.snapshots.lock(), snapshot.clone());
        Ok(())
    }

    fn query(&self, range: &TimeRange) -> Result<Vec<SensorSnapshot>, PersistenceError> {
        self.check()?;
        Ok(self
            .snapshots
            .lock()
            .iter()
            .filter(|s| range.contains(s.timestamp))
            .cloned()
            .collect())
    }

    fn latest(&self) -> Result<Option<SensorSnapshot>, PersistenceError> {
        self.check()?;
        Ok(self.snapshots.lock().last().cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: Mutex::new(values.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }
}

impl SettingsRepository for MemorySettings {
    fn get(&self, name: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.values.lock().get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<(), PersistenceError> {
        self.values.lock().insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn all(&self) -> Result<HashMap<String, String>, PersistenceError> {
        Ok(self.values.lock().clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<ActuatorState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ControlStateStore for MemoryStateStore {
    fn save(&self, state: &ActuatorState) -> Result<(), PersistenceError> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<ActuatorState>, PersistenceError> {
        Ok(self.state.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn snap(minute: u32, temperature: f64) -> SensorSnapshot {
        SensorSnapshot {
            temperature,
            humidity: 50.0,
            light_level: 400.0,
            soil_moisture: None,
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 10, minute, 0).unwrap(),
        }
    }

    #[test]
    fn test_query_is_sorted_and_bounded() {
        let repo = MemoryReadings::new();
        repo.append(&snap(30, 3.0)).unwrap();
        repo.append(&snap(10, 1.0)).unwrap();
        repo.append(&snap(20, 2.0)).unwrap();

        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 10, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 20, 0).unwrap(),
        );
        let temps: Vec<f64> = repo.query(&range).unwrap().iter().map(|s| s.temperature).collect();
        assert_eq!(temps, vec![1.0, 2.0]);
        assert_eq!(repo.latest().unwrap().unwrap().temperature, 3.0);
    }

    #[test]
    fn test_unavailable_store_fails() {
        let repo = MemoryReadings::new();
        repo.set_unavailable(true);
        assert!(repo.append(&snap(0, 1.0)).is_err());
        repo.set_unavailable(false);
        assert!(repo.append(&snap(0, 1.0)).is_ok());
    }
}
