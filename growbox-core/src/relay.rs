//! Command relay: routes an actuator change to whoever owns the relays
//!
//! - Local: this node drives the HAL itself, then echoes control/status
//! - Peer: publish a control/command while connected; otherwise fall back to a
//!   local HAL if one exists, else the change stays in the replica only
//!
//! The replica is always updated first (optimistic). Nothing is buffered.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::HardwareError;
use crate::hal::SharedHal;
use crate::models::Actuator;
use crate::replica::ControlReplica;
use crate::transport::Synchronizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// HAL driven on this node
    AppliedLocally,
    /// Command sent to the owning peer
    Published,
    /// Peer unreachable, local fallback HAL driven instead
    FallbackApplied,
    /// Replica updated, nobody drove a relay
    NotDelivered,
}

impl RelayOutcome {
    pub fn delivered(&self) -> bool {
        !matches!(self, RelayOutcome::NotDelivered)
    }
}

enum Ownership {
    Local(SharedHal),
    Peer { fallback: Option<SharedHal> },
}

pub struct CommandRelay {
    ownership: Ownership,
    replica: Arc<ControlReplica>,
    sync: Arc<Synchronizer>,
}

impl CommandRelay {
    /// This node owns the relays
    pub fn local(hal: SharedHal, replica: Arc<ControlReplica>, sync: Arc<Synchronizer>) -> Self {
        Self {
            ownership: Ownership::Local(hal),
            replica,
            sync,
        }
    }

    /// The peer owns the relays; `fallback` is used while it is unreachable
    pub fn peer(fallback: Option<SharedHal>, replica: Arc<ControlReplica>, sync: Arc<Synchronizer>) -> Self {
        Self {
            ownership: Ownership::Peer { fallback },
            replica,
            sync,
        }
    }

    pub fn hal(&self) -> Option<&SharedHal> {
        match &self.ownership {
            Ownership::Local(hal) => Some(hal),
            Ownership::Peer { fallback } => fallback.as_ref(),
        }
    }

    /// Operator or automation change decided on this node
    pub async fn request(&self, actuator: Actuator, on: bool, at: DateTime<Utc>) -> RelayOutcome {
        match &self.ownership {
            Ownership::Local(_) => self.apply_local(actuator, on, at).await,
            Ownership::Peer { fallback } => {
                self.replica.set(actuator, on, at);

                if self.sync.is_connected() {
                    match self.sync.publish_command(actuator, on, at) {
                        Ok(()) => {
                            info!("Published control command: {} = {}", actuator, on);
                            return RelayOutcome::Published;
                        }
                        Err(e) => warn!("failed to publish {} command: {}", actuator, e),
                    }
                }

                match fallback {
                    Some(hal) => {
                        drive(hal, actuator, on).await;
                        info!("peer unreachable, {} = {} applied on local hardware", actuator, on);
                        RelayOutcome::FallbackApplied
                    }
                    None => {
                        warn!("peer unreachable, {} = {} kept in local state only", actuator, on);
                        RelayOutcome::NotDelivered
                    }
                }
            }
        }
    }

    /// Command addressed to this node (inbound control/command or local decision).
    /// Applying the same command twice leaves the same state.
    pub async fn apply_local(&self, actuator: Actuator, on: bool, at: DateTime<Utc>) -> RelayOutcome {
        self.replica.set(actuator, on, at);

        let Some(hal) = self.hal() else {
            warn!("no hardware on this node, {} = {} not applied", actuator, on);
            return RelayOutcome::NotDelivered;
        };
        drive(hal, actuator, on).await;

        if self.sync.is_connected() {
            if let Err(e) = self.sync.publish_status(&self.replica.snapshot(), at) {
                warn!("failed to echo control status: {}", e);
            }
        } else {
            debug!("offline, control status echo skipped");
        }
        RelayOutcome::AppliedLocally
    }
}

/// HAL calls run on the blocking pool
async fn drive(hal: &SharedHal, actuator: Actuator, on: bool) {
    if let Err(e) = set_actuator_blocking(hal.clone(), actuator, on).await {
        warn!("{}", e);
    }
}

pub(crate) async fn set_actuator_blocking(hal: SharedHal, actuator: Actuator, on: bool) -> Result<bool, HardwareError> {
    tokio::task::spawn_blocking(move || hal.lock().set_actuator(actuator, on))
        .await
        .map_err(|e| HardwareError::Worker(e.to_string()))
}
