/**
 * HAL - Couche d'abstraction matérielle (capteurs + relais)
 *
 * RÔLE :
 * Même logique de décision contre des périphériques simulés ou physiques.
 * Le choix est fait UNE fois au démarrage par select_hal() à partir d'un probe :
 * - mode simulated : SimulatedHal
 * - mode auto / physical : probe sysfs, repli en simulation si le probe échoue
 *   (loggé une fois, jamais retenté pour la durée du process)
 *
 * CONTRAT :
 * - read_sensors() ne retourne jamais d'erreur : un capteur en défaut est
 *   remplacé par sa valeur de repli documentée (warn!)
 * - set_actuator() est idempotent et retourne l'état appliqué
 * - all_off() met toutes les sorties à l'état sûr
 */

mod physical;
mod simulated;

pub use physical::PhysicalHal;
pub use simulated::SimulatedHal;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{HalMode, HardwareConf};
use crate::models::{Actuator, SensorSnapshot};

/// Valeurs de repli quand un capteur ne répond pas
pub const FALLBACK_TEMPERATURE: f64 = 20.0;
pub const FALLBACK_HUMIDITY: f64 = 50.0;
pub const FALLBACK_LIGHT_LEVEL: f64 = 500.0;
pub const FALLBACK_SOIL_MOISTURE: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HalKind {
    Simulated,
    Physical,
}

pub trait Hal: Send {
    fn kind(&self) -> HalKind;

    /// One reading per sensor, fallbacks substituted for failed ones
    fn read_sensors(&mut self, at: DateTime<Utc>) -> SensorSnapshot;

    /// Drives one relay; returns the applied state
    fn set_actuator(&mut self, actuator: Actuator, on: bool) -> bool;

    /// Safe state: every relay off
    fn all_off(&mut self);
}

/// HAL shared between the sampling task and command handlers
pub type SharedHal = Arc<Mutex<Box<dyn Hal>>>;

pub fn shared(hal: Box<dyn Hal>) -> SharedHal {
    Arc::new(Mutex::new(hal))
}

/// Picks the HAL variant for this process
pub fn select_hal(conf: &HardwareConf) -> Box<dyn Hal> {
    let simulated = || match conf.simulation_seed {
        Some(seed) => SimulatedHal::seeded(seed),
        None => SimulatedHal::new(),
    };

    match conf.mode {
        HalMode::Simulated => {
            info!("hardware mode: simulated");
            Box::new(simulated())
        }
        HalMode::Auto | HalMode::Physical => match PhysicalHal::probe(conf) {
            Ok(hal) => {
                info!(
                    "hardware mode: physical (fan={}, light={}, water_pump={})",
                    conf.pins.fan, conf.pins.light, conf.pins.water_pump
                );
                Box::new(hal)
            }
            Err(e) => {
                warn!("physical hardware unavailable ({}), running in simulation mode", e);
                Box::new(simulated())
            }
        },
    }
}

/// Rounds a reading to one decimal like the dashboard displays it
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_sysfs_downgrades_to_simulation() {
        let dir = TempDir::new().unwrap();
        let conf = HardwareConf {
            mode: HalMode::Physical,
            sysfs_root: dir.path().to_path_buf(),
            ..HardwareConf::default()
        };
        assert_eq!(select_hal(&conf).kind(), HalKind::Simulated);
    }

    #[test]
    fn test_simulated_mode_skips_probe() {
        let conf = HardwareConf {
            mode: HalMode::Simulated,
            simulation_seed: Some(7),
            ..HardwareConf::default()
        };
        let mut hal = select_hal(&conf);
        assert_eq!(hal.kind(), HalKind::Simulated);
        assert!(hal.set_actuator(Actuator::Fan, true));
    }
}
