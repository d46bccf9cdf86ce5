/*!
Test Harness pour noeuds growbox

Assemble un `GrowNode` complet sans broker ni matériel :
- Stub MQTT à la place de rumqttc::AsyncClient
- HAL espion (ou aucun HAL pour un dashboard sans fallback)
- Dépôts en mémoire + horloge manuelle en UTC
*/

use crate::clock::ManualClock;
use crate::hal_spy::{SpyHal, SpyHandle};
use crate::mqtt_stub::{GrowboxMessageBuilder, MockMqttClient};
use anyhow::Result;
use growbox_core::config::{NodeConfig, NodeRole};
use growbox_core::contracts::Channel;
use growbox_core::hal::Hal;
use growbox_core::health::ConnectionState;
use growbox_core::ports::{MemoryReadings, MemorySettings};
use growbox_core::transport::dispatch::Dispatched;
use growbox_core::transport::TransportEvent;
use growbox_core::{GrowNode, NodeDeps};
use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Harness de test complet pour un noeud
pub struct TestHarness {
    pub node: Arc<GrowNode>,
    pub mqtt_client: MockMqttClient,
    /// None when the node has no relays of its own
    pub hal: Option<SpyHandle>,
    pub readings: Arc<MemoryReadings>,
    pub settings: Arc<MemorySettings>,
    pub clock: ManualClock,
    pub messages: GrowboxMessageBuilder,
}

impl TestHarness {
    /// Noeud capteur avec HAL espion
    pub fn sensor() -> Self {
        Self::build(NodeRole::Sensor, true, &[])
    }

    /// Dashboard sans relais local
    pub fn dashboard() -> Self {
        Self::build(NodeRole::Dashboard, false, &[])
    }

    /// Dashboard qui pilote ses propres relais quand le capteur est injoignable
    pub fn dashboard_with_fallback() -> Self {
        Self::build(NodeRole::Dashboard, true, &[])
    }

    /// `settings` are stored before the node seeds its defaults
    pub fn build(role: NodeRole, with_hal: bool, settings: &[(&str, &str)]) -> Self {
        init_logging();

        let config = NodeConfig {
            role,
            device_name: match role {
                NodeRole::Sensor => "test-sensor".into(),
                NodeRole::Dashboard => "test-dashboard".into(),
            },
            schedule_utc_offset_minutes: Some(0),
            local_fallback: role == NodeRole::Dashboard && with_hal,
            shutdown_grace_secs: 1,
            ..NodeConfig::default()
        };

        let (hal, handle) = if with_hal {
            let (spy, handle) = SpyHal::new();
            (Some(Box::new(spy) as Box<dyn Hal>), Some(handle))
        } else {
            (None, None)
        };

        let mqtt_client = MockMqttClient::new();
        let readings = Arc::new(MemoryReadings::new());
        let settings = Arc::new(MemorySettings::with_values(settings.iter().copied()));
        let clock = ManualClock::at(12, 0, 0);

        let node = Arc::new(GrowNode::new(NodeDeps {
            link: Arc::new(mqtt_client.clone()),
            hal,
            readings: readings.clone(),
            settings: settings.clone(),
            state_store: None,
            clock: Arc::new(clock.clone()),
            config,
        }));

        Self {
            node,
            mqtt_client,
            hal: handle,
            readings,
            settings,
            clock,
            messages: GrowboxMessageBuilder::default(),
        }
    }

    /// Le broker accepte la connexion
    pub async fn connect(&self) -> ConnectionState {
        self.node
            .handle_transport_event(TransportEvent::ConnAck { success: true })
            .await
    }

    /// Le broker ferme la connexion
    pub async fn disconnect(&self) -> ConnectionState {
        self.node.handle_transport_event(TransportEvent::Disconnect).await
    }

    /// Simule un message entrant sur un canal
    pub async fn send(&self, channel: Channel, payload: &Value) -> Result<Dispatched> {
        let topic = self.messages.topic(channel);
        let bytes = serde_json::to_vec(payload)?;
        tracing::info!("📨 Sent test message on {}", topic);
        Ok(self.node.handle_inbound(&topic, &bytes).await)
    }

    /// Tous les payloads JSON publiés sur un canal
    pub fn published(&self, channel: Channel) -> Result<Vec<Value>> {
        self.mqtt_client
            .find_messages_by_topic(&self.messages.topic(channel))
            .iter()
            .map(|msg| -> Result<Value> { Ok(serde_json::from_slice(&msg.payload)?) })
            .collect()
    }

    pub fn last_published(&self, channel: Channel) -> Result<Option<Value>> {
        self.mqtt_client
            .get_last_json_message(&self.messages.topic(channel))
    }

    /// Assert qu'un champ du dernier message a une valeur donnée
    pub fn assert_field_equals(&self, channel: Channel, field: &str, expected: &Value) -> Result<()> {
        let Some(msg) = self.last_published(channel)? else {
            anyhow::bail!("nothing published on {}", self.messages.topic(channel));
        };
        match msg.get(field) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => anyhow::bail!("Field '{}' mismatch: expected {:?}, got {:?}", field, expected, actual),
            None => anyhow::bail!("Field '{}' not found in {}", field, self.messages.topic(channel)),
        }
    }

    /// Oublie les messages enregistrés (et les appels HAL)
    pub fn reset(&self) {
        self.mqtt_client.clear();
        if let Some(hal) = &self.hal {
            hal.clear();
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_connect_subscribes_and_announces() {
        let harness = TestHarness::sensor();
        assert_eq!(harness.connect().await, ConnectionState::Connected);

        let subs = harness.mqtt_client.get_subscriptions();
        assert!(subs.contains(&"opengrow/control/command".to_string()));
        harness
            .assert_field_equals(Channel::SystemStatus, "status", &json!("online"))
            .unwrap();
        harness
            .assert_field_equals(Channel::ControlStatus, "fan", &json!(false))
            .unwrap();
    }

    #[tokio::test]
    async fn test_dashboard_has_no_hal() {
        let harness = TestHarness::dashboard();
        assert!(harness.hal.is_none());
        assert_eq!(harness.disconnect().await, ConnectionState::Disconnected);
    }
}
