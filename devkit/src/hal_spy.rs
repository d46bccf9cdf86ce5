/*!
HAL espion : lectures scriptées, appels aux relais enregistrés

Le HAL est déplacé dans le noeud (Box<dyn Hal>) ; le test garde un `SpyHandle`
qui partage le même état pour les assertions et pour changer les lectures.
*/

use chrono::{DateTime, Utc};
use growbox_core::hal::{Hal, HalKind};
use growbox_core::{Actuator, SensorSnapshot};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HalCall {
    Read,
    Set(Actuator, bool),
    AllOff,
}

#[derive(Debug, Clone, Copy)]
pub struct Readings {
    pub temperature: f64,
    pub humidity: f64,
    pub light_level: f64,
    pub soil_moisture: Option<f64>,
}

impl Default for Readings {
    fn default() -> Self {
        Self {
            temperature: 24.0,
            humidity: 55.0,
            light_level: 400.0,
            soil_moisture: Some(45.0),
        }
    }
}

#[derive(Default)]
struct SpyState {
    calls: Vec<HalCall>,
    readings: Readings,
}

pub struct SpyHal {
    state: Arc<Mutex<SpyState>>,
}

#[derive(Clone)]
pub struct SpyHandle {
    state: Arc<Mutex<SpyState>>,
}

impl SpyHal {
    pub fn new() -> (Self, SpyHandle) {
        let state = Arc::new(Mutex::new(SpyState::default()));
        (
            Self {
                state: state.clone(),
            },
            SpyHandle { state },
        )
    }
}

impl Hal for SpyHal {
    fn kind(&self) -> HalKind {
        HalKind::Simulated
    }

    fn read_sensors(&mut self, at: DateTime<Utc>) -> SensorSnapshot {
        let mut state = self.state.lock().unwrap();
        state.calls.push(HalCall::Read);
        let r = state.readings;
        SensorSnapshot {
            temperature: r.temperature,
            humidity: r.humidity,
            light_level: r.light_level,
            soil_moisture: r.soil_moisture,
            timestamp: at,
        }
    }

    fn set_actuator(&mut self, actuator: Actuator, on: bool) -> bool {
        self.state.lock().unwrap().calls.push(HalCall::Set(actuator, on));
        on
    }

    fn all_off(&mut self) {
        self.state.lock().unwrap().calls.push(HalCall::AllOff);
    }
}

impl SpyHandle {
    pub fn set_readings(&self, readings: Readings) {
        self.state.lock().unwrap().readings = readings;
    }

    pub fn set_temperature(&self, temperature: f64) {
        self.state.lock().unwrap().readings.temperature = temperature;
    }

    pub fn calls(&self) -> Vec<HalCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Only the relay writes, in order
    pub fn actuator_calls(&self) -> Vec<(Actuator, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HalCall::Set(a, on) => Some((a, on)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().calls.clear();
    }
}
