//! Error taxonomy for the growbox core
//!
//! Every error here is recoverable by the component that sees it:
//! - TransportError: absorbed by the connection state machine
//! - HardwareError: absorbed by fallback readings or logging
//! - PersistenceError: logged, the caller drops the tick or returns nothing
//! - ConfigError: the node falls back to its default configuration

use std::path::PathBuf;

/// Erreurs côté transport MQTT (connect, publish, subscribe, décodage)
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("invalid payload on {topic}: {reason}")]
    InvalidPayload { topic: String, reason: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Erreurs matérielles (probe, lecture capteur, écriture relais)
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("hardware probe failed: {0}")]
    Probe(String),
    #[error("failed to read {sensor} from {path}: {reason}")]
    Read {
        sensor: &'static str,
        path: PathBuf,
        reason: String,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("hardware worker failed: {0}")]
    Worker(String),
}

/// Erreurs des dépôts (lectures capteurs, réglages, miroir d'état)
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Erreurs de chargement de la configuration du noeud
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Error surfaced by a single sampling or automation tick
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
