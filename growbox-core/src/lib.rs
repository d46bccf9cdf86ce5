/**
 * GROWBOX CORE - Synchronisation des commandes et automatisation d'une serre
 *
 * RÔLE : Tout ce qui tourne sur un noeud, capteur ou dashboard : HAL, moteur de
 * décision, réplica de l'état des actionneurs, télémétrie, synchroniseur MQTT.
 *
 * ARCHITECTURE : deux noeuds reliés par un broker MQTT. Le noeud capteur possède
 * les relais ; le dashboard agrège l'historique et relaie les commandes opérateur.
 * Le binaire growbox-node ne fait que l'amorçage (config, logs, signaux).
 */

pub mod clock;
pub mod config;
pub mod contracts;
pub mod engine;
pub mod error;
pub mod hal;
pub mod health;
pub mod models;
pub mod node;
pub mod ports;
pub mod relay;
pub mod replica;
pub mod settings;
pub mod telemetry;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::{NodeConfig, NodeRole};
pub use error::{ConfigError, HardwareError, NodeError, PersistenceError, TransportError};
pub use models::{Actuator, ActuatorState, ControlIntent, SensorSnapshot};
pub use node::{GrowNode, NodeDeps, NodeHandle};
