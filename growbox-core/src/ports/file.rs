//! File-backed adapters for a standalone node
//!
//! - JsonlReadings: one JSON snapshot per line, appended in place
//! - JsonFileSettings: whole map in one JSON object, cached in memory
//! - JsonStateStore: last actuator state, rewritten on every change

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{insert_sorted, ControlStateStore, ReadingsRepository, SettingsRepository, TimeRange};
use crate::error::PersistenceError;
use crate::models::{ActuatorState, SensorSnapshot};

#[derive(Debug)]
pub struct JsonlReadings {
    path: PathBuf,
    // sérialise les appends concurrents (dashboard + boucle locale)
    write_lock: Mutex<()>,
}

impl JsonlReadings {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<Vec<SensorSnapshot>, PersistenceError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)?;
        let mut snapshots = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SensorSnapshot>(&line) {
                Ok(snapshot) => insert_sorted(&mut snapshots, snapshot),
                Err(e) => warn!("skipping corrupt reading at {}:{}: {}", self.path.display(), lineno + 1, e),
            }
        }
        Ok(snapshots)
    }
}

impl ReadingsRepository for JsonlReadings {
    fn append(&self, snapshot: &SensorSnapshot) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_string(snapshot)?;
        line.push('\n');

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn query(&self, range: &TimeRange) -> Result<Vec<SensorSnapshot>, PersistenceError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|s| range.contains(s.timestamp))
            .collect())
    }

    fn latest(&self) -> Result<Option<SensorSnapshot>, PersistenceError> {
        Ok(self.read_all()?.pop())
    }
}

#[derive(Debug)]
pub struct JsonFileSettings {
    values: Mutex<HashMap<String, String>>,
    path: PathBuf,
}

impl JsonFileSettings {
    /// Opens the store, creating an empty file if none exists yet
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, PersistenceError> {
        let path = path.into();
        let values = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            fs::write(&path, "{}")?;
            info!("created empty settings file at {}", path.display());
            HashMap::new()
        };

        Ok(Self {
            values: Mutex::new(values),
            path,
        })
    }

    fn save_to_disk(&self, values: &HashMap<String, String>) -> Result<(), PersistenceError> {
        let content = serde_json::to_string_pretty(values)?;
        write_atomic(&self.path, content.as_bytes())
    }
}

impl SettingsRepository for JsonFileSettings {
    fn get(&self, name: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.values.lock().get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<(), PersistenceError> {
        let mut values = self.values.lock();
        values.insert(name.to_string(), value.to_string());
        self.save_to_disk(&values)
    }

    fn all(&self) -> Result<HashMap<String, String>, PersistenceError> {
        Ok(self.values.lock().clone())
    }
}

#[derive(Debug)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl ControlStateStore for JsonStateStore {
    fn save(&self, state: &ActuatorState) -> Result<(), PersistenceError> {
        let content = serde_json::to_string_pretty(state)?;
        write_atomic(&self.path, content.as_bytes())
    }

    fn load(&self) -> Result<Option<ActuatorState>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

/// Write to a sibling temp file then rename over the target
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    #[test]
    fn test_jsonl_survives_corrupt_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("readings.jsonl");
        let repo = JsonlReadings::new(&path);

        let at = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        repo.append(&SensorSnapshot {
            temperature: 22.0,
            humidity: 50.0,
            light_level: 100.0,
            soil_moisture: Some(40.0),
            timestamp: at,
        })
        .unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();

        let all = repo.query(&TimeRange::last_hours(at, 1)).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(repo.latest().unwrap().unwrap().soil_moisture, Some(40.0));
    }

    #[test]
    fn test_settings_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");

        let store = JsonFileSettings::open(&path).unwrap();
        assert_eq!(store.get("temperature_max").unwrap(), None);
        store.set("temperature_max", "28.5").unwrap();

        let reopened = JsonFileSettings::open(&path).unwrap();
        assert_eq!(reopened.get_or("temperature_max", "30.0"), "28.5");
        assert_eq!(reopened.get_or("light_auto", "true"), "true");
    }

    #[test]
    fn test_state_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = JsonStateStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());

        let mut state = ActuatorState::all_off(Utc::now());
        state.fan = true;
        store.save(&state).unwrap();
        assert!(store.load().unwrap().unwrap().fan);
    }
}
