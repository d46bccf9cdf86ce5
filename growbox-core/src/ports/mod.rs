/**
 * DATA PORTS - Interfaces de persistance consommées par le coeur
 *
 * RÔLE :
 * Le coeur ne possède ni la base de réglages ni l'historique des mesures.
 * Il les consomme à travers trois ports :
 * - SettingsRepository  = lecture/écriture clé → valeur (réglages d'automatisation)
 * - ReadingsRepository  = append + requête par plage de temps (mesures brutes)
 * - ControlStateStore   = miroir persistant de l'état des actionneurs
 *
 * Des adaptateurs de référence sont fournis : mémoire (tests, dashboard
 * éphémère) et fichiers JSON (noeud autonome).
 */

mod file;
mod memory;

pub use file::{JsonFileSettings, JsonStateStore, JsonlReadings};
pub use memory::{MemoryReadings, MemorySettings, MemoryStateStore};

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::error::PersistenceError;
use crate::models::{ActuatorState, SensorSnapshot};

/// Closed time interval [start, end]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// [now - hours, now]
    pub fn last_hours(now: DateTime<Utc>, hours: u32) -> Self {
        Self::new(now - Duration::hours(hours as i64), now)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Raw readings storage (append-only time series)
pub trait ReadingsRepository: Send + Sync {
    fn append(&self, snapshot: &SensorSnapshot) -> Result<(), PersistenceError>;

    /// Snapshots inside `range`, ascending by timestamp
    fn query(&self, range: &TimeRange) -> Result<Vec<SensorSnapshot>, PersistenceError>;

    /// Most recent snapshot, if any
    fn latest(&self) -> Result<Option<SensorSnapshot>, PersistenceError>;
}

/// Key/value settings store
pub trait SettingsRepository: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>, PersistenceError>;

    fn set(&self, name: &str, value: &str) -> Result<(), PersistenceError>;

    fn all(&self) -> Result<HashMap<String, String>, PersistenceError>;

    /// Value or `default`; a failing store reads as the default
    fn get_or(&self, name: &str, default: &str) -> String {
        match self.get(name) {
            Ok(Some(value)) => value,
            Ok(None) => default.to_string(),
            Err(e) => {
                tracing::error!("Error retrieving setting '{}': {}", name, e);
                default.to_string()
            }
        }
    }
}

/// Persistent mirror of the replica (best effort, not atomic with memory)
pub trait ControlStateStore: Send + Sync {
    fn save(&self, state: &ActuatorState) -> Result<(), PersistenceError>;

    fn load(&self) -> Result<Option<ActuatorState>, PersistenceError>;
}

/// Keeps `snapshots` sorted by timestamp after an append
pub(crate) fn insert_sorted(snapshots: &mut Vec<SensorSnapshot>, snapshot: SensorSnapshot) {
    let idx = snapshots.partition_point(|s| s.timestamp <= snapshot.timestamp);
    snapshots.insert(idx, snapshot);
}
