use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::contracts::Presence;
use crate::hal::HalKind;

/// États de la connexion au broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Dernière présence connue du pair (system/status)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerPresence {
    pub status: Presence,
    pub device: Option<String>,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHealth {
    pub uptime_seconds: u64,
    pub mqtt_status: ConnectionState,
    pub mqtt_reconnects: u32,
    pub peer: Option<PeerPresence>,
    pub hardware: Option<HalKind>,
    pub memory_usage_mb: f32,
}

/// Suivi connexion + présence, partagé entre la tâche transport et l'API du noeud
#[derive(Clone)]
pub struct LinkHealth {
    start_time: Instant,
    reconnects: Arc<AtomicU32>,
    state: Arc<Mutex<ConnectionState>>,
    peer: Arc<Mutex<Option<PeerPresence>>>,
}

impl LinkHealth {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            reconnects: Arc::new(AtomicU32::new(0)),
            state: Arc::new(Mutex::new(ConnectionState::Idle)),
            peer: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    pub fn increment_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn mark_peer(&self, status: Presence, device: Option<String>, since: DateTime<Utc>) {
        *self.peer.lock() = Some(PeerPresence {
            status,
            device,
            since,
        });
    }

    pub fn peer(&self) -> Option<PeerPresence> {
        self.peer.lock().clone()
    }

    pub fn get_health(&self, hardware: Option<HalKind>) -> NodeHealth {
        NodeHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            mqtt_status: self.state(),
            mqtt_reconnects: self.reconnects(),
            peer: self.peer(),
            hardware,
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

impl Default for LinkHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// RSS du process depuis /proc (0 hors Linux)
fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(Ok(kb)) = rest.split_whitespace().next().map(str::parse::<u64>) {
                        return kb as f32 / 1024.0;
                    }
                }
            }
        }
    }
    0.0
}
