//! MQTT topic contracts shared by the sensor node and the dashboard node
//!
//! Four logical channels under a common prefix (`opengrow/` by default):
//! - sensors/data     sensor → dashboard, one per sampling tick
//! - control/command  dashboard → sensor, one per operator/automation action
//! - control/status   sensor → dashboard, echoed after every applied command
//! - system/status    both ways, retained presence (+ last will)
//!
//! Payloads are JSON, one object per message.

use chrono::{DateTime, Utc};
use rumqttc::QoS;
use serde::{Deserialize, Serialize};

use crate::models::{Actuator, ActuatorState, SensorSnapshot};

pub const DEFAULT_TOPIC_PREFIX: &str = "opengrow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    SensorData,
    ControlCommand,
    ControlStatus,
    SystemStatus,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::SensorData,
        Channel::ControlCommand,
        Channel::ControlStatus,
        Channel::SystemStatus,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            Channel::SensorData => "sensors/data",
            Channel::ControlCommand => "control/command",
            Channel::ControlStatus => "control/status",
            Channel::SystemStatus => "system/status",
        }
    }

    pub fn qos(&self) -> QoS {
        QoS::AtLeastOnce
    }

    /// Only presence is retained
    pub fn retained(&self) -> bool {
        matches!(self, Channel::SystemStatus)
    }
}

/// Topic names for one deployment
#[derive(Debug, Clone)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn topic(&self, channel: Channel) -> String {
        if self.prefix.is_empty() {
            channel.suffix().to_string()
        } else {
            format!("{}/{}", self.prefix, channel.suffix())
        }
    }

    /// Ex: "opengrow/control/status" -> Some(Channel::ControlStatus)
    pub fn channel_of(&self, topic: &str) -> Option<Channel> {
        let rest = if self.prefix.is_empty() {
            topic
        } else {
            topic.strip_prefix(&self.prefix)?.strip_prefix('/')?
        };
        Channel::ALL.into_iter().find(|c| c.suffix() == rest)
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX)
    }
}

/// control/command payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub command: Actuator,
    #[serde(deserialize_with = "lenient_bool")]
    pub value: bool,
    #[serde(with = "wire_time")]
    pub timestamp: DateTime<Utc>,
}

/// control/status payload; on input every field is optional (partial merge)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_pump: Option<bool>,
    #[serde(default, with = "wire_time::option", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ControlStatus {
    pub fn from_state(state: &ActuatorState, at: DateTime<Utc>) -> Self {
        Self {
            fan: Some(state.fan),
            light: Some(state.light),
            water_pump: Some(state.water_pump),
            timestamp: Some(at),
        }
    }

    pub fn get(&self, actuator: Actuator) -> Option<bool> {
        match actuator {
            Actuator::Fan => self.fan,
            Actuator::Light => self.light,
            Actuator::WaterPump => self.water_pump,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

/// system/status payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub status: Presence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(with = "wire_time")]
    pub timestamp: DateTime<Utc>,
}

/// Every message a node can send or receive
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    SensorData(SensorSnapshot),
    ControlCommand(ControlCommand),
    ControlStatus(ControlStatus),
    SystemStatus(SystemStatus),
}

impl TransportMessage {
    pub fn channel(&self) -> Channel {
        match self {
            TransportMessage::SensorData(_) => Channel::SensorData,
            TransportMessage::ControlCommand(_) => Channel::ControlCommand,
            TransportMessage::ControlStatus(_) => Channel::ControlStatus,
            TransportMessage::SystemStatus(_) => Channel::SystemStatus,
        }
    }

    pub fn decode(channel: Channel, payload: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match channel {
            Channel::SensorData => TransportMessage::SensorData(serde_json::from_slice(payload)?),
            Channel::ControlCommand => {
                TransportMessage::ControlCommand(serde_json::from_slice(payload)?)
            }
            Channel::ControlStatus => {
                TransportMessage::ControlStatus(serde_json::from_slice(payload)?)
            }
            Channel::SystemStatus => TransportMessage::SystemStatus(serde_json::from_slice(payload)?),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            TransportMessage::SensorData(m) => serde_json::to_vec(m),
            TransportMessage::ControlCommand(m) => serde_json::to_vec(m),
            TransportMessage::ControlStatus(m) => serde_json::to_vec(m),
            TransportMessage::SystemStatus(m) => serde_json::to_vec(m),
        }
    }
}

/// Accepts true/false, "true"/"false" and 0/1 like the old REST handlers did
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => Ok(b),
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Ok(true),
            "false" | "off" | "0" => Ok(false),
            other => Err(D::Error::custom(format!("not a boolean: {other}"))),
        },
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(D::Error::custom(format!("not a boolean: {n}"))),
        },
        other => Err(D::Error::custom(format!("not a boolean: {other}"))),
    }
}

/// Timestamps go out as RFC 3339; naive ISO 8601 instants from older senders
/// are read as UTC.
pub mod wire_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// RFC 3339, or an offset-less ISO instant taken as UTC
    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}")))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(s) => super::parse(&s)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}"))),
            }
        }
    }
}
