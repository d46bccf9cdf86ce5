//! Core data model shared by both nodes
//!
//! SensorSnapshot, Actuator, ActuatorState and ControlIntent. The wire shapes of
//! the snapshot and the state live here too since they travel unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::contracts::wire_time;

/// One sampling tick worth of readings. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    /// °C
    pub temperature: f64,
    /// %
    pub humidity: f64,
    /// lux
    pub light_level: f64,
    /// % (None when the node has no soil probe)
    #[serde(default)]
    pub soil_moisture: Option<f64>,
    #[serde(with = "wire_time")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actuator {
    Fan,
    Light,
    WaterPump,
}

impl Actuator {
    pub const ALL: [Actuator; 3] = [Actuator::Fan, Actuator::Light, Actuator::WaterPump];

    pub fn as_str(&self) -> &'static str {
        match self {
            Actuator::Fan => "fan",
            Actuator::Light => "light",
            Actuator::WaterPump => "water_pump",
        }
    }
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown actuator: {0}")]
pub struct UnknownActuator(pub String);

impl FromStr for Actuator {
    type Err = UnknownActuator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fan" => Ok(Actuator::Fan),
            "light" => Ok(Actuator::Light),
            // l'ancienne API REST exposait /controls/water
            "water_pump" | "water" => Ok(Actuator::WaterPump),
            other => Err(UnknownActuator(other.to_string())),
        }
    }
}

/// Actuator states as held by a node's replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorState {
    pub fan: bool,
    pub light: bool,
    pub water_pump: bool,
    pub updated_at: DateTime<Utc>,
}

impl ActuatorState {
    /// Startup state: everything off
    pub fn all_off(at: DateTime<Utc>) -> Self {
        Self {
            fan: false,
            light: false,
            water_pump: false,
            updated_at: at,
        }
    }

    pub fn get(&self, actuator: Actuator) -> bool {
        match actuator {
            Actuator::Fan => self.fan,
            Actuator::Light => self.light,
            Actuator::WaterPump => self.water_pump,
        }
    }

    /// Sets one actuator, returns true when the value actually changed
    pub fn set(&mut self, actuator: Actuator, on: bool) -> bool {
        let slot = match actuator {
            Actuator::Fan => &mut self.fan,
            Actuator::Light => &mut self.light,
            Actuator::WaterPump => &mut self.water_pump,
        };
        let changed = *slot != on;
        *slot = on;
        changed
    }
}

/// Tri-state decision per actuator: Some(value) to drive it, None for no change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlIntent {
    pub fan: Option<bool>,
    pub light: Option<bool>,
    pub water_pump: Option<bool>,
}

impl ControlIntent {
    pub fn get(&self, actuator: Actuator) -> Option<bool> {
        match actuator {
            Actuator::Fan => self.fan,
            Actuator::Light => self.light,
            Actuator::WaterPump => self.water_pump,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fan.is_none() && self.light.is_none() && self.water_pump.is_none()
    }

    /// Requested values that differ from `previous`
    pub fn changes(&self, previous: &ActuatorState) -> Vec<(Actuator, bool)> {
        Actuator::ALL
            .iter()
            .filter_map(|&a| match self.get(a) {
                Some(v) if v != previous.get(a) => Some((a, v)),
                _ => None,
            })
            .collect()
    }

    /// State after applying this intent on top of `previous`
    pub fn resolve(&self, previous: &ActuatorState) -> ActuatorState {
        let mut next = previous.clone();
        for a in Actuator::ALL {
            if let Some(v) = self.get(a) {
                next.set(a, v);
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actuator_names() {
        assert_eq!("water_pump".parse::<Actuator>().unwrap(), Actuator::WaterPump);
        assert_eq!("water".parse::<Actuator>().unwrap(), Actuator::WaterPump);
        assert!("heater".parse::<Actuator>().is_err());
        assert_eq!(serde_json::to_string(&Actuator::WaterPump).unwrap(), "\"water_pump\"");
    }

    #[test]
    fn test_intent_changes_skip_noops() {
        let mut prev = ActuatorState::all_off(Utc::now());
        prev.set(Actuator::Light, true);
        let intent = ControlIntent { fan: Some(true), light: Some(true), water_pump: None };

        assert_eq!(intent.changes(&prev), vec![(Actuator::Fan, true)]);
        let next = intent.resolve(&prev);
        assert!(next.fan && next.light && !next.water_pump);
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let json = r#"{"temperature":21.5,"humidity":55.0,"light_level":300.0,"soil_moisture":null,"timestamp":"2025-03-01T10:00:00"}"#;
        let snap: SensorSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.soil_moisture, None);
        assert_eq!(snap.timestamp.to_rfc3339(), "2025-03-01T10:00:00+00:00");
    }
}
