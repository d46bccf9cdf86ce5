/**
 * CONTROL REPLICA - Copie locale de l'état des actionneurs
 *
 * RÔLE :
 * Une seule instance par noeud, protégée par un unique Mutex : un lecteur ne voit
 * jamais un état à moitié mis à jour.
 *
 * SOURCES D'ÉCRITURE :
 * - décisions locales (automatisation, opérateur) → set, un actionneur à la fois
 * - statuts du pair (control/status) → apply_status, fusion partielle
 *   ordonnée par timestamp : un statut plus ancien que le dernier appliqué est
 *   ignoré, un statut sans timestamp est appliqué ; la référence est oubliée
 *   quand le pair revient online ou que notre lien se reconnecte
 *
 * Le miroir persistant (ControlStateStore) est écrit après coup, hors verrou.
 */

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::contracts::ControlStatus;
use crate::models::{Actuator, ActuatorState};
use crate::ports::ControlStateStore;

#[derive(Debug, Clone, PartialEq)]
pub enum StatusOutcome {
    /// Fields that actually changed
    Applied(Vec<(Actuator, bool)>),
    Stale {
        received: DateTime<Utc>,
        last_applied: DateTime<Utc>,
    },
}

struct ReplicaInner {
    state: ActuatorState,
    last_peer_status: Option<DateTime<Utc>>,
}

pub struct ControlReplica {
    inner: Mutex<ReplicaInner>,
    store: Option<Arc<dyn ControlStateStore>>,
}

impl ControlReplica {
    /// All-off replica without persistence
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(ReplicaInner {
                state: ActuatorState::all_off(at),
                last_peer_status: None,
            }),
            store: None,
        }
    }

    /// All-off replica mirrored to `store`. A state left over from the previous
    /// run is reported but not restored.
    pub fn with_store(store: Arc<dyn ControlStateStore>, at: DateTime<Utc>) -> Self {
        match store.load() {
            Ok(Some(previous)) => info!(
                "previous run ended with fan={} light={} water_pump={}, starting all off",
                previous.fan, previous.light, previous.water_pump
            ),
            Ok(None) => {}
            Err(e) => warn!("could not read persisted control state: {}", e),
        }
        let replica = Self {
            store: Some(store),
            ..Self::new(at)
        };
        replica.persist(&replica.snapshot());
        replica
    }

    pub fn snapshot(&self) -> ActuatorState {
        self.inner.lock().state.clone()
    }

    pub fn get(&self, actuator: Actuator) -> bool {
        self.inner.lock().state.get(actuator)
    }

    /// Returns true when the value changed
    pub fn set(&self, actuator: Actuator, on: bool, at: DateTime<Utc>) -> bool {
        let changed = {
            let mut inner = self.inner.lock();
            let changed = inner.state.set(actuator, on);
            if changed {
                inner.state.updated_at = at;
            }
            changed.then(|| inner.state.clone())
        };
        match changed {
            Some(state) => {
                self.persist(&state);
                true
            }
            None => false,
        }
    }

    /// Forgets the last applied peer timestamp. Called when the peer announces
    /// itself online and when our own link comes back: a rebooted peer may
    /// restart with its clock behind.
    pub fn reset_peer_watermark(&self) {
        if self.inner.lock().last_peer_status.take().is_some() {
            debug!("peer status watermark cleared");
        }
    }

    /// Merges the fields present in a peer status
    pub fn apply_status(&self, status: &ControlStatus, received_at: DateTime<Utc>) -> StatusOutcome {
        let (changes, state) = {
            let mut inner = self.inner.lock();
            if let (Some(ts), Some(last)) = (status.timestamp, inner.last_peer_status) {
                if ts < last {
                    debug!("discarding stale control status from {} (last applied {})", ts, last);
                    return StatusOutcome::Stale {
                        received: ts,
                        last_applied: last,
                    };
                }
            }
            if let Some(ts) = status.timestamp {
                inner.last_peer_status = Some(ts);
            }

            let mut changes = Vec::new();
            for actuator in Actuator::ALL {
                if let Some(on) = status.get(actuator) {
                    if inner.state.set(actuator, on) {
                        changes.push((actuator, on));
                    }
                }
            }
            if !changes.is_empty() {
                inner.state.updated_at = status.timestamp.unwrap_or(received_at);
            }
            (changes, inner.state.clone())
        };

        if !changes.is_empty() {
            self.persist(&state);
        }
        StatusOutcome::Applied(changes)
    }

    /// Safe state at shutdown
    pub fn reset_all_off(&self, at: DateTime<Utc>) {
        let state = {
            let mut inner = self.inner.lock();
            inner.state = ActuatorState::all_off(at);
            inner.state.clone()
        };
        self.persist(&state);
    }

    fn persist(&self, state: &ActuatorState) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(state) {
                error!("failed to persist control state: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MemoryStateStore;
    use chrono::{Duration, TimeZone};

    fn t(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, sec).unwrap()
    }

    #[test]
    fn test_set_is_idempotent() {
        let replica = ControlReplica::new(t(0));
        assert!(replica.set(Actuator::Fan, true, t(1)));
        assert!(!replica.set(Actuator::Fan, true, t(2)));
        let state = replica.snapshot();
        assert!(state.fan);
        assert_eq!(state.updated_at, t(1));
    }

    #[test]
    fn test_partial_status_merges_present_fields() {
        let replica = ControlReplica::new(t(0));
        replica.set(Actuator::Light, true, t(1));

        let status = ControlStatus {
            fan: Some(true),
            ..ControlStatus::default()
        };
        assert_eq!(
            replica.apply_status(&status, t(2)),
            StatusOutcome::Applied(vec![(Actuator::Fan, true)])
        );
        let state = replica.snapshot();
        assert!(state.fan && state.light && !state.water_pump);
    }

    #[test]
    fn test_stale_status_is_discarded() {
        let replica = ControlReplica::new(t(0));
        let newer = ControlStatus {
            fan: Some(true),
            timestamp: Some(t(30)),
            ..ControlStatus::default()
        };
        let older = ControlStatus {
            fan: Some(false),
            timestamp: Some(t(30) - Duration::seconds(10)),
            ..ControlStatus::default()
        };

        replica.apply_status(&newer, t(31));
        assert!(matches!(replica.apply_status(&older, t(32)), StatusOutcome::Stale { .. }));
        assert!(replica.get(Actuator::Fan));

        // sans timestamp : toujours appliqué
        let untimed = ControlStatus {
            fan: Some(false),
            ..ControlStatus::default()
        };
        assert_eq!(
            replica.apply_status(&untimed, t(33)),
            StatusOutcome::Applied(vec![(Actuator::Fan, false)])
        );
    }

    #[test]
    fn test_watermark_reset_accepts_rebooted_peer() {
        let replica = ControlReplica::new(t(0));
        let before_reboot = ControlStatus {
            fan: Some(true),
            timestamp: Some(t(10)),
            ..ControlStatus::default()
        };
        let after_reboot = ControlStatus {
            fan: Some(false),
            timestamp: Some(t(10) - Duration::hours(1)),
            ..ControlStatus::default()
        };

        replica.apply_status(&before_reboot, t(11));
        replica.reset_peer_watermark();
        assert_eq!(
            replica.apply_status(&after_reboot, t(12)),
            StatusOutcome::Applied(vec![(Actuator::Fan, false)])
        );
        assert!(!replica.get(Actuator::Fan));
    }

    #[test]
    fn test_changes_are_mirrored() {
        let store = Arc::new(MemoryStateStore::new());
        let replica = ControlReplica::with_store(store.clone(), t(0));
        replica.set(Actuator::WaterPump, true, t(5));
        assert!(store.load().unwrap().unwrap().water_pump);

        replica.reset_all_off(t(6));
        assert!(!store.load().unwrap().unwrap().water_pump);
    }
}
