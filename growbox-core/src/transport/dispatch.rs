//! Inbound dispatcher: topic → channel → TransportMessage → handler
//!
//! Handlers get the replica, telemetry store, relay and presence tracker as
//! explicit parameters. Malformed payloads are logged and dropped.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::contracts::{ControlCommand, ControlStatus, Presence, SystemStatus, TransportMessage};
use crate::health::LinkHealth;
use crate::models::SensorSnapshot;
use crate::relay::{CommandRelay, RelayOutcome};
use crate::replica::{ControlReplica, StatusOutcome};
use crate::telemetry::TelemetryStore;

use super::Synchronizer;

/// Ce que le dispatcher a fait du message
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Recorded,
    Command(RelayOutcome),
    Status(StatusOutcome),
    Presence,
    /// Own retained presence or an unsupported message for this role
    Ignored,
    Dropped(String),
}

pub struct DispatchContext<'a> {
    pub sync: &'a Synchronizer,
    pub replica: &'a ControlReplica,
    pub telemetry: &'a TelemetryStore,
    pub relay: &'a CommandRelay,
    pub presence: &'a LinkHealth,
}

pub async fn dispatch(ctx: &DispatchContext<'_>, topic: &str, payload: &[u8], now: DateTime<Utc>) -> Dispatched {
    let message = match ctx.sync.decode(topic, payload) {
        Ok(message) => message,
        Err(e) => {
            warn!("dropping inbound message: {}", e);
            return Dispatched::Dropped(e.to_string());
        }
    };

    match message {
        TransportMessage::SensorData(snapshot) => handle_sensor_data(&snapshot, ctx.telemetry),
        TransportMessage::ControlCommand(cmd) => handle_command(&cmd, ctx.relay, now).await,
        TransportMessage::ControlStatus(status) => handle_status(&status, ctx.replica, now),
        TransportMessage::SystemStatus(status) => handle_presence(status, ctx.presence, ctx.replica, ctx.sync.device()),
    }
}

fn handle_sensor_data(snapshot: &SensorSnapshot, telemetry: &TelemetryStore) -> Dispatched {
    match telemetry.record(snapshot) {
        Ok(()) => {
            debug!("Stored sensor data from {}", snapshot.timestamp);
            Dispatched::Recorded
        }
        Err(e) => {
            error!("Error storing sensor data: {}", e);
            Dispatched::Dropped(e.to_string())
        }
    }
}

async fn handle_command(cmd: &ControlCommand, relay: &CommandRelay, now: DateTime<Utc>) -> Dispatched {
    info!("Received command: {} = {}", cmd.command, cmd.value);
    Dispatched::Command(relay.apply_local(cmd.command, cmd.value, now).await)
}

fn handle_status(status: &ControlStatus, replica: &ControlReplica, now: DateTime<Utc>) -> Dispatched {
    let outcome = replica.apply_status(status, now);
    if let StatusOutcome::Applied(changes) = &outcome {
        if !changes.is_empty() {
            debug!("control status merged: {:?}", changes);
        }
    }
    Dispatched::Status(outcome)
}

fn handle_presence(
    status: SystemStatus,
    presence: &LinkHealth,
    replica: &ControlReplica,
    own_device: &str,
) -> Dispatched {
    if status.device.as_deref() == Some(own_device) {
        return Dispatched::Ignored;
    }
    // un pair qui redémarre peut avoir une horloge en retard
    if status.status == Presence::Online {
        replica.reset_peer_watermark();
    }
    info!(
        "peer {} is {:?}",
        status.device.as_deref().unwrap_or("<unknown>"),
        status.status
    );
    presence.mark_peer(status.status, status.device, status.timestamp);
    Dispatched::Presence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeRole;
    use crate::contracts::Topics;
    use crate::hal::{self, SimulatedHal};
    use crate::health::ConnectionState;
    use crate::models::Actuator;
    use crate::ports::MemoryReadings;
    use crate::test_support::RecordingLink;
    use std::sync::Arc;

    struct Fixture {
        link: Arc<RecordingLink>,
        sync: Arc<Synchronizer>,
        replica: Arc<ControlReplica>,
        telemetry: TelemetryStore,
        relay: CommandRelay,
        health: LinkHealth,
    }

    impl Fixture {
        fn new(role: NodeRole) -> Self {
            let link = Arc::new(RecordingLink::default());
            let health = LinkHealth::new();
            health.set_state(ConnectionState::Connected);
            let sync = Arc::new(Synchronizer::new(
                link.clone(),
                Topics::default(),
                role,
                "node-a".into(),
                health.clone(),
            ));
            let replica = Arc::new(ControlReplica::new(Utc::now()));
            let relay = match role {
                NodeRole::Sensor => CommandRelay::local(
                    hal::shared(Box::new(SimulatedHal::seeded(1))),
                    replica.clone(),
                    sync.clone(),
                ),
                NodeRole::Dashboard => CommandRelay::peer(None, replica.clone(), sync.clone()),
            };
            Self {
                link,
                sync,
                replica,
                telemetry: TelemetryStore::new(Arc::new(MemoryReadings::new())),
                relay,
                health,
            }
        }

        async fn dispatch(&self, topic: &str, payload: &str) -> Dispatched {
            let ctx = DispatchContext {
                sync: &self.sync,
                replica: &self.replica,
                telemetry: &self.telemetry,
                relay: &self.relay,
                presence: &self.health,
            };
            dispatch(&ctx, topic, payload.as_bytes(), Utc::now()).await
        }
    }

    #[tokio::test]
    async fn test_command_is_idempotent_and_echoed() {
        let fx = Fixture::new(NodeRole::Sensor);
        let payload = r#"{"command":"fan","value":true,"timestamp":"2025-03-01T10:00:00Z"}"#;

        let first = fx.dispatch("opengrow/control/command", payload).await;
        let after_first = fx.replica.snapshot();
        let second = fx.dispatch("opengrow/control/command", payload).await;

        assert_eq!(first, Dispatched::Command(RelayOutcome::AppliedLocally));
        assert_eq!(second, first);
        assert_eq!(fx.replica.snapshot().fan, after_first.fan);
        assert!(fx.replica.get(Actuator::Fan));
        assert_eq!(fx.link.published_on("opengrow/control/status").len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let fx = Fixture::new(NodeRole::Sensor);
        assert!(matches!(
            fx.dispatch("opengrow/control/command", "{oops").await,
            Dispatched::Dropped(_)
        ));
        assert!(matches!(fx.dispatch("opengrow/unknown", "{}").await, Dispatched::Dropped(_)));
        assert!(!fx.replica.get(Actuator::Fan));
    }

    #[tokio::test]
    async fn test_own_presence_is_ignored() {
        let fx = Fixture::new(NodeRole::Dashboard);
        let own = r#"{"status":"online","device":"node-a","timestamp":"2025-03-01T10:00:00Z"}"#;
        let peer = r#"{"status":"offline","device":"node-b","timestamp":"2025-03-01T10:00:00Z"}"#;

        assert_eq!(fx.dispatch("opengrow/system/status", own).await, Dispatched::Ignored);
        assert!(fx.health.peer().is_none());

        assert_eq!(fx.dispatch("opengrow/system/status", peer).await, Dispatched::Presence);
        assert_eq!(fx.health.peer().unwrap().status, Presence::Offline);
    }

    #[tokio::test]
    async fn test_peer_online_clears_status_watermark() {
        let fx = Fixture::new(NodeRole::Dashboard);
        let before = r#"{"fan":true,"timestamp":"2025-03-01T12:00:10Z"}"#;
        let online = r#"{"status":"online","device":"node-b","timestamp":"2025-03-01T11:00:00Z"}"#;
        let after = r#"{"fan":false,"timestamp":"2025-03-01T11:00:01Z"}"#;

        fx.dispatch("opengrow/control/status", before).await;
        assert_eq!(fx.dispatch("opengrow/system/status", online).await, Dispatched::Presence);
        assert_eq!(
            fx.dispatch("opengrow/control/status", after).await,
            Dispatched::Status(StatusOutcome::Applied(vec![(Actuator::Fan, false)]))
        );
        assert!(!fx.replica.get(Actuator::Fan));
    }

    #[tokio::test]
    async fn test_dashboard_records_sensor_data_and_status() {
        let fx = Fixture::new(NodeRole::Dashboard);
        let data = r#"{"temperature":24.0,"humidity":55.0,"light_level":420.0,"soil_moisture":30.0,"timestamp":"2025-03-01T10:00:00"}"#;
        assert_eq!(fx.dispatch("opengrow/sensors/data", data).await, Dispatched::Recorded);
        assert_eq!(fx.telemetry.latest().unwrap().temperature, 24.0);

        let status = r#"{"light":true,"timestamp":"2025-03-01T10:00:01Z"}"#;
        assert_eq!(
            fx.dispatch("opengrow/control/status", status).await,
            Dispatched::Status(StatusOutcome::Applied(vec![(Actuator::Light, true)]))
        );
    }
}
