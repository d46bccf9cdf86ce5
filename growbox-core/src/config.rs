use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

use crate::clock::ScheduleZone;
use crate::contracts::DEFAULT_TOPIC_PREFIX;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Owns the sensors and relays
    #[default]
    Sensor,
    /// Aggregates history, relays operator commands
    Dashboard,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HalMode {
    #[default]
    Auto,
    Simulated,
    Physical,
}

/// BCM pin numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub fan: u32,
    pub light: u32,
    pub water_pump: u32,
    /// None when no soil probe is wired
    pub soil_moisture: Option<u32>,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            fan: 18,
            light: 23,
            water_pump: 24,
            soil_moisture: Some(17),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConf {
    pub mode: HalMode,
    pub sysfs_root: PathBuf,
    pub pins: PinConfig,
    /// relay boards that switch on a low level
    pub active_low: bool,
    pub dht_iio_device: String,
    pub light_iio_device: String,
    pub simulation_seed: Option<u64>,
}

impl Default for HardwareConf {
    fn default() -> Self {
        Self {
            mode: HalMode::Auto,
            sysfs_root: PathBuf::from("/sys"),
            pins: PinConfig::default(),
            active_low: false,
            dht_iio_device: "iio:device0".into(),
            light_iio_device: "iio:device1".into(),
            simulation_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub retry_initial_secs: u64,
    pub retry_max_secs: u64,
    pub request_capacity: usize,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: 15,
            retry_initial_secs: 1,
            retry_max_secs: 30,
            request_capacity: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConf {
    pub interval_secs: u64,
    pub error_backoff_secs: u64,
    pub automation_interval_secs: u64,
}

impl Default for SamplingConf {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            error_backoff_secs: 5,
            automation_interval_secs: 5,
        }
    }
}

impl SamplingConf {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs.max(1))
    }

    pub fn automation_interval(&self) -> Duration {
        Duration::from_secs(self.automation_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConf {
    pub data_dir: PathBuf,
    pub settings_file: String,
    pub readings_file: String,
    pub state_file: String,
}

impl Default for StorageConf {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            settings_file: "settings.json".into(),
            readings_file: "readings.jsonl".into(),
            state_file: "control_state.json".into(),
        }
    }
}

impl StorageConf {
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(&self.settings_file)
    }

    pub fn readings_path(&self) -> PathBuf {
        self.data_dir.join(&self.readings_file)
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join(&self.state_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub role: NodeRole,
    pub device_name: String,
    pub topic_prefix: String,
    pub mqtt: MqttConf,
    pub hardware: HardwareConf,
    pub sampling: SamplingConf,
    /// None = on for the sensor node, off for the dashboard
    pub automation_enabled: Option<bool>,
    pub storage: StorageConf,
    /// Offset for schedule hours; absent = local time
    pub schedule_utc_offset_minutes: Option<i32>,
    pub shutdown_grace_secs: u64,
    /// Dashboard only: drive local relays while the sensor node is unreachable
    pub local_fallback: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::Sensor,
            device_name: default_device_name(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.into(),
            mqtt: MqttConf::default(),
            hardware: HardwareConf::default(),
            sampling: SamplingConf::default(),
            automation_enabled: None,
            storage: StorageConf::default(),
            schedule_utc_offset_minutes: None,
            shutdown_grace_secs: 5,
            local_fallback: false,
        }
    }
}

impl NodeConfig {
    /// Explicit client id, else "growbox-<role>-<device>"
    pub fn client_id(&self) -> String {
        if let Some(id) = self.mqtt.client_id.as_ref().filter(|id| !id.trim().is_empty()) {
            return id.clone();
        }
        let role = match self.role {
            NodeRole::Sensor => "sensor",
            NodeRole::Dashboard => "dashboard",
        };
        format!("growbox-{}-{}", role, self.device_name)
    }

    pub fn schedule_zone(&self) -> ScheduleZone {
        ScheduleZone::from_offset_minutes(self.schedule_utc_offset_minutes)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// MQTT_BROKER, MQTT_PORT, MQTT_USERNAME, MQTT_PASSWORD, MQTT_CLIENT_ID, GROWBOX_ROLE
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MQTT_BROKER") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            match port.trim().parse() {
                Ok(port) => self.mqtt.port = port,
                Err(_) => warn!("ignoring invalid MQTT_PORT '{}'", port),
            }
        }
        if let Some(user) = lookup("MQTT_USERNAME") {
            self.mqtt.username = Some(user);
        }
        if let Some(pass) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = Some(pass);
        }
        if let Some(id) = lookup("MQTT_CLIENT_ID") {
            self.mqtt.client_id = Some(id);
        }
        if let Some(role) = lookup("GROWBOX_ROLE") {
            match role.trim().to_ascii_lowercase().as_str() {
                "sensor" => self.role = NodeRole::Sensor,
                "dashboard" => self.role = NodeRole::Dashboard,
                other => warn!("ignoring unknown GROWBOX_ROLE '{}'", other),
            }
        }
    }
}

/// Hostname, else a random id
fn default_device_name() -> String {
    let host = gethostname::gethostname().to_string_lossy().trim().to_string();
    if host.is_empty() {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("growbox-{}", &id[..8])
    } else {
        host
    }
}

pub fn parse_config(path: &Path, text: &str) -> Result<NodeConfig, ConfigError> {
    if text.trim().is_empty() {
        return Ok(NodeConfig::default());
    }
    serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub async fn read_config(path: &Path) -> Result<NodeConfig, ConfigError> {
    let text = fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(path, &text)
}

/// GROWBOX_CONFIG (default growbox.yaml) + env overrides; never fails
pub async fn load_config() -> NodeConfig {
    let path = PathBuf::from(std::env::var("GROWBOX_CONFIG").unwrap_or_else(|_| "growbox.yaml".into()));
    let mut config = if path.exists() {
        read_config(&path).await.unwrap_or_else(|e| {
            warn!("{}, using default configuration", e);
            NodeConfig::default()
        })
    } else {
        info!("no {} found, using default configuration", path.display());
        NodeConfig::default()
    };
    config.apply_env(|key| std::env::var(key).ok());
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
role: dashboard
device_name: dash-1
mqtt:
  host: broker.lan
hardware:
  mode: simulated
  pins:
    fan: 5
sampling:
  interval_secs: 10
"#;
        let cfg = parse_config(Path::new("growbox.yaml"), yaml).unwrap();
        assert_eq!(cfg.role, NodeRole::Dashboard);
        assert_eq!(cfg.mqtt.host, "broker.lan");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.hardware.mode, HalMode::Simulated);
        assert_eq!(cfg.hardware.pins.fan, 5);
        assert_eq!(cfg.hardware.pins.light, 23);
        assert_eq!(cfg.sampling.interval_secs, 10);
        assert_eq!(cfg.sampling.error_backoff_secs, 5);
        assert_eq!(cfg.client_id(), "growbox-dashboard-dash-1");
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let err = parse_config(Path::new("bad.yaml"), "role: [not, a, role]").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(parse_config(Path::new("empty.yaml"), "  \n").is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MQTT_BROKER", "10.0.0.2"),
            ("MQTT_PORT", "not-a-port"),
            ("MQTT_USERNAME", "grow"),
            ("MQTT_PASSWORD", "secret"),
            ("GROWBOX_ROLE", "Dashboard"),
        ]
        .into_iter()
        .collect();

        let mut cfg = NodeConfig::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.mqtt.host, "10.0.0.2");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.mqtt.username.as_deref(), Some("grow"));
        assert_eq!(cfg.role, NodeRole::Dashboard);
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let err = read_config(Path::new("/nonexistent/growbox.yaml")).await.unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
