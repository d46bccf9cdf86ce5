/*!
Mock MQTT link pour tester un noeud sans broker

Implémente `MqttLink` : enregistre toutes les publications et abonnements,
et peut simuler un client en panne (toutes les requêtes échouent).
*/

use anyhow::Result;
use growbox_core::contracts::{Channel, Topics};
use growbox_core::transport::MqttLink;
use growbox_core::TransportError;
use rumqttc::QoS;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Mock MQTT link qui remplace rumqttc::AsyncClient
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    failing: Arc<AtomicBool>,
    disconnected: Arc<AtomicBool>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toutes les requêtes suivantes échouent (client hors service)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.failing.load(Ordering::Relaxed) {
            Err(TransportError::NotConnected)
        } else {
            Ok(())
        }
    }

    /// Récupère tous les messages publiés (pour assertions de tests)
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    /// Récupère les abonnements (pour assertions de tests)
    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Trouve les messages publiés sur un topic donné
    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse le dernier message d'un topic en JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        if let Some(last_msg) = messages.last() {
            let parsed: T = serde_json::from_slice(&last_msg.payload)?;
            Ok(Some(parsed))
        } else {
            Ok(None)
        }
    }

    /// Reset tous les messages enregistrés
    pub fn clear(&self) {
        self.published_messages.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
    }
}

impl MqttLink for MockMqttClient {
    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<(), TransportError> {
        self.check()?;
        tracing::debug!("[MOCK] Published to {}: {} bytes", topic, payload.len());
        self.published_messages.lock().unwrap().push(MockMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        self.check()?;
        tracing::debug!("[MOCK] Subscribed to {}", topic);
        self.subscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.check()?;
        self.disconnected.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Payloads de test conformes aux contrats opengrow/*
pub struct GrowboxMessageBuilder {
    topics: Topics,
}

impl GrowboxMessageBuilder {
    pub fn new(prefix: &str) -> Self {
        Self {
            topics: Topics::new(prefix),
        }
    }

    pub fn topic(&self, channel: Channel) -> String {
        self.topics.topic(channel)
    }

    /// sensors/data
    pub fn sensor_data(temperature: f64, humidity: f64, light_level: f64, soil_moisture: Option<f64>) -> Value {
        serde_json::json!({
            "temperature": temperature,
            "humidity": humidity,
            "light_level": light_level,
            "soil_moisture": soil_moisture,
            "timestamp": chrono::Utc::now().to_rfc3339()
        })
    }

    /// control/command
    pub fn control_command(command: &str, value: bool) -> Value {
        serde_json::json!({
            "command": command,
            "value": value,
            "timestamp": chrono::Utc::now().to_rfc3339()
        })
    }

    /// control/status partiel, timestamp explicite
    pub fn control_status(fields: &[(&str, bool)], timestamp: &str) -> Value {
        let mut status = serde_json::Map::new();
        for (name, value) in fields {
            status.insert(name.to_string(), Value::Bool(*value));
        }
        status.insert("timestamp".into(), Value::String(timestamp.to_string()));
        Value::Object(status)
    }

    /// system/status
    pub fn presence(status: &str, device: &str) -> Value {
        serde_json::json!({
            "status": status,
            "device": device,
            "timestamp": chrono::Utc::now().to_rfc3339()
        })
    }
}

impl Default for GrowboxMessageBuilder {
    fn default() -> Self {
        Self::new(growbox_core::contracts::DEFAULT_TOPIC_PREFIX)
    }
}
