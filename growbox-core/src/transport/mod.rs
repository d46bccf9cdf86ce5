/**
 * TRANSPORT SYNCHRONIZER - Lien MQTT entre noeud capteur et dashboard
 *
 * RÔLE :
 * Garde l'état des actionneurs cohérent entre les deux noeuds malgré une
 * connectivité instable.
 *
 * MACHINE À ÉTATS :
 *   Idle → Connecting → Connected → Disconnected → Connecting …
 * - CONNACK accepté      : Connecting → Connected (abonnements + présence online)
 * - CONNACK refusé       : → Disconnected
 * - erreur / DISCONNECT  : Connected → Disconnected
 * - délai de retry écoulé: Disconnected → Connecting (backoff exponentiel plafonné)
 *
 * Les publications passent par le chemin non bloquant du client (try_publish) :
 * on n'attend jamais le broker. Hors connexion, rien n'est mis en file.
 */

pub mod dispatch;

use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, LastWill, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{MqttConf, NodeRole};
use crate::contracts::{
    Channel, ControlCommand, ControlStatus, Presence, SystemStatus, Topics, TransportMessage,
};
use crate::error::TransportError;
use crate::health::{ConnectionState, LinkHealth};
use crate::models::{Actuator, ActuatorState, SensorSnapshot};

/// Côté émission du client MQTT
pub trait MqttLink: Send + Sync {
    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<(), TransportError>;

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    fn disconnect(&self) -> Result<(), TransportError>;
}

impl MqttLink for AsyncClient {
    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<(), TransportError> {
        self.try_publish(topic, qos, retain, payload)?;
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.try_subscribe(topic, qos)?;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.try_disconnect()?;
        Ok(())
    }
}

/// What the I/O task extracts from the client event loop
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ConnAck { success: bool },
    Publish { topic: String, payload: Vec<u8> },
    Disconnect,
    Error(String),
}

impl TransportEvent {
    /// None for protocol chatter (acks, pings, outgoing)
    pub fn from_mqtt(event: &Event) -> Option<Self> {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => Some(TransportEvent::ConnAck {
                success: matches!(ack.code, ConnectReturnCode::Success),
            }),
            Event::Incoming(Packet::Publish(p)) => Some(TransportEvent::Publish {
                topic: p.topic.clone(),
                payload: p.payload.to_vec(),
            }),
            Event::Incoming(Packet::Disconnect) => Some(TransportEvent::Disconnect),
            _ => None,
        }
    }
}

/// Transition de la machine à états pour un événement reçu
pub fn next_state(current: ConnectionState, event: &TransportEvent) -> ConnectionState {
    match event {
        TransportEvent::ConnAck { success: true } => ConnectionState::Connected,
        TransportEvent::ConnAck { success: false } => ConnectionState::Disconnected,
        TransportEvent::Disconnect | TransportEvent::Error(_) => ConnectionState::Disconnected,
        TransportEvent::Publish { .. } => current,
    }
}

/// Backoff exponentiel plafonné, remis à zéro à la connexion
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl RetryPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    pub fn from_conf(conf: &MqttConf) -> Self {
        Self::new(
            Duration::from_secs(conf.retry_initial_secs),
            Duration::from_secs(conf.retry_max_secs),
        )
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(16));
        self.attempt = self.attempt.saturating_add(1);
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Options client avec le last-will `offline` retenu
pub fn build_mqtt_options(conf: &MqttConf, client_id: &str, topics: &Topics, device: &str) -> MqttOptions {
    let mut opts = MqttOptions::new(client_id, &conf.host, conf.port);
    opts.set_keep_alive(Duration::from_secs(conf.keep_alive_secs));
    if let (Some(user), Some(pass)) = (&conf.username, &conf.password) {
        opts.set_credentials(user, pass);
    }

    let will = SystemStatus {
        status: Presence::Offline,
        device: Some(device.to_string()),
        timestamp: Utc::now(),
    };
    match serde_json::to_vec(&will) {
        Ok(payload) => {
            let channel = Channel::SystemStatus;
            opts.set_last_will(LastWill::new(
                topics.topic(channel),
                payload,
                channel.qos(),
                channel.retained(),
            ));
        }
        Err(e) => warn!("could not encode last will: {}", e),
    }
    opts
}

/// Publication / abonnement + suivi de l'état de connexion
pub struct Synchronizer {
    link: Arc<dyn MqttLink>,
    topics: Topics,
    role: NodeRole,
    device: String,
    health: LinkHealth,
}

impl Synchronizer {
    pub fn new(link: Arc<dyn MqttLink>, topics: Topics, role: NodeRole, device: String, health: LinkHealth) -> Self {
        Self {
            link,
            topics,
            role,
            device,
            health,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn health(&self) -> &LinkHealth {
        &self.health
    }

    pub fn is_connected(&self) -> bool {
        self.health.is_connected()
    }

    /// Channels this node subscribes to
    pub fn inbound_channels(role: NodeRole) -> &'static [Channel] {
        match role {
            NodeRole::Sensor => &[Channel::ControlCommand, Channel::SystemStatus],
            NodeRole::Dashboard => &[Channel::SensorData, Channel::ControlStatus, Channel::SystemStatus],
        }
    }

    /// Idle → Connecting (premier démarrage)
    pub fn begin_connect(&self) {
        self.health.set_state(ConnectionState::Connecting);
        info!("connecting to MQTT broker as {}", self.device);
    }

    /// Disconnected → Connecting après le délai de retry
    pub fn begin_reconnect(&self) {
        self.health.increment_reconnects();
        self.health.set_state(ConnectionState::Connecting);
        debug!("reconnect attempt #{}", self.health.reconnects());
    }

    /// Applies one event to the state machine and returns the new state
    pub fn apply_event(&self, event: &TransportEvent) -> ConnectionState {
        let current = self.health.state();
        let next = next_state(current, event);
        if next != current {
            match (next, event) {
                (ConnectionState::Connected, _) => info!("MQTT connected"),
                (_, TransportEvent::ConnAck { .. }) => warn!("MQTT connection refused by broker"),
                (_, TransportEvent::Error(reason)) => warn!("MQTT connection error: {}", reason),
                _ => warn!("MQTT broker closed the connection"),
            }
            self.health.set_state(next);
        }
        next
    }

    /// Entering Connected: subscribe, announce presence, sensor node pushes its state
    pub fn on_connected(&self, current_state: Option<&ActuatorState>, at: DateTime<Utc>) {
        for &channel in Self::inbound_channels(self.role) {
            let topic = self.topics.topic(channel);
            match self.link.subscribe(&topic, channel.qos()) {
                Ok(()) => debug!("subscribed to {}", topic),
                Err(e) => warn!("subscribe to {} failed: {}", topic, e),
            }
        }

        if let Err(e) = self.publish_presence(Presence::Online, at) {
            warn!("failed to announce presence: {}", e);
        }
        if let Some(state) = current_state {
            if let Err(e) = self.publish_status(state, at) {
                warn!("failed to publish control status: {}", e);
            }
        }
    }

    pub fn publish(&self, message: &TransportMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let channel = message.channel();
        let payload = message.encode()?;
        self.link
            .publish(&self.topics.topic(channel), channel.qos(), channel.retained(), payload)
    }

    pub fn publish_sensor_data(&self, snapshot: &SensorSnapshot) -> Result<(), TransportError> {
        self.publish(&TransportMessage::SensorData(snapshot.clone()))
    }

    pub fn publish_command(&self, actuator: Actuator, value: bool, at: DateTime<Utc>) -> Result<(), TransportError> {
        self.publish(&TransportMessage::ControlCommand(ControlCommand {
            command: actuator,
            value,
            timestamp: at,
        }))
    }

    pub fn publish_status(&self, state: &ActuatorState, at: DateTime<Utc>) -> Result<(), TransportError> {
        self.publish(&TransportMessage::ControlStatus(ControlStatus::from_state(state, at)))
    }

    pub fn publish_presence(&self, status: Presence, at: DateTime<Utc>) -> Result<(), TransportError> {
        self.publish(&TransportMessage::SystemStatus(SystemStatus {
            status,
            device: Some(self.device.clone()),
            timestamp: at,
        }))
    }

    /// Présence offline puis DISCONNECT (arrêt propre, le last-will n'est pas émis)
    pub fn go_offline(&self, at: DateTime<Utc>) {
        if !self.is_connected() {
            return;
        }
        if let Err(e) = self.publish_presence(Presence::Offline, at) {
            warn!("failed to publish offline presence: {}", e);
        }
        if let Err(e) = self.link.disconnect() {
            warn!("MQTT disconnect failed: {}", e);
        }
        self.health.set_state(ConnectionState::Disconnected);
    }

    /// topic + payload → message typé
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<TransportMessage, TransportError> {
        let channel = self
            .topics
            .channel_of(topic)
            .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;
        TransportMessage::decode(channel, payload).map_err(|e| TransportError::InvalidPayload {
            topic: topic.to_string(),
            reason: e.to_string(),
        })
    }
}
