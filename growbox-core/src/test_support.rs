//! In-crate test doubles (the devkit crate has the full harness)

use parking_lot::Mutex;
use rumqttc::QoS;

use crate::error::TransportError;
use crate::transport::MqttLink;

#[derive(Debug, Clone)]
pub struct Sent {
    pub topic: String,
    pub retain: bool,
    pub payload: Vec<u8>,
}

#[derive(Default)]
pub struct RecordingLink {
    pub sent: Mutex<Vec<Sent>>,
    pub subscriptions: Mutex<Vec<String>>,
    pub disconnected: Mutex<bool>,
}

impl RecordingLink {
    pub fn published_on(&self, topic: &str) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .filter_map(|m| serde_json::from_slice(&m.payload).ok())
            .collect()
    }
}

impl MqttLink for RecordingLink {
    fn publish(&self, topic: &str, _qos: QoS, retain: bool, payload: Vec<u8>) -> Result<(), TransportError> {
        self.sent.lock().push(Sent {
            topic: topic.to_string(),
            retain,
            payload,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        self.subscriptions.lock().push(topic.to_string());
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        *self.disconnected.lock() = true;
        Ok(())
    }
}
