use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{round1, Hal, HalKind};
use crate::models::{Actuator, ActuatorState, SensorSnapshot};

/// Uniform random readings in plausible grow-box ranges
pub struct SimulatedHal {
    rng: StdRng,
    outputs: ActuatorState,
}

impl SimulatedHal {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic sequence, for tests
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            outputs: ActuatorState::all_off(Utc::now()),
        }
    }

    pub fn output(&self, actuator: Actuator) -> bool {
        self.outputs.get(actuator)
    }
}

impl Default for SimulatedHal {
    fn default() -> Self {
        Self::new()
    }
}

impl Hal for SimulatedHal {
    fn kind(&self) -> HalKind {
        HalKind::Simulated
    }

    fn read_sensors(&mut self, at: DateTime<Utc>) -> SensorSnapshot {
        SensorSnapshot {
            temperature: round1(self.rng.gen_range(18.0..=30.0)),
            humidity: round1(self.rng.gen_range(30.0..=80.0)),
            light_level: round1(self.rng.gen_range(0.0..=1000.0)),
            soil_moisture: Some(round1(self.rng.gen_range(0.0..=100.0))),
            timestamp: at,
        }
    }

    fn set_actuator(&mut self, actuator: Actuator, on: bool) -> bool {
        if self.outputs.set(actuator, on) {
            debug!("[sim] {} -> {}", actuator, if on { "ON" } else { "OFF" });
        }
        on
    }

    fn all_off(&mut self) {
        for actuator in Actuator::ALL {
            self.outputs.set(actuator, false);
        }
        debug!("[sim] all outputs off");
    }
}
