//! Growbox node - process bootstrap
//!
//! Same binary for both roles (GROWBOX_ROLE or `role:` in growbox.yaml):
//! - sensor: owns the relays and sensors, samples and automates
//! - dashboard: records history, relays operator commands to the sensor node
//!
//! Runs until Ctrl-C, then shuts the node down with every output off.

use anyhow::{Context, Result};
use growbox_core::clock::SystemClock;
use growbox_core::config::{load_config, NodeConfig, NodeRole};
use growbox_core::contracts::Topics;
use growbox_core::hal::{self, Hal};
use growbox_core::ports::{JsonFileSettings, JsonStateStore, JsonlReadings};
use growbox_core::transport::build_mqtt_options;
use growbox_core::{GrowNode, NodeDeps};
use rumqttc::AsyncClient;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn build_hal(config: &NodeConfig) -> Option<Box<dyn Hal>> {
    match config.role {
        NodeRole::Sensor => Some(hal::select_hal(&config.hardware)),
        NodeRole::Dashboard if config.local_fallback => Some(hal::select_hal(&config.hardware)),
        NodeRole::Dashboard => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config().await;
    info!(
        "Growbox node starting: role={:?}, device={}, broker={}:{}",
        config.role, config.device_name, config.mqtt.host, config.mqtt.port
    );

    let storage = &config.storage;
    std::fs::create_dir_all(&storage.data_dir)
        .with_context(|| format!("Failed to create data directory {}", storage.data_dir.display()))?;
    let settings = JsonFileSettings::open(storage.settings_path())
        .with_context(|| format!("Failed to open settings {}", storage.settings_path().display()))?;
    let readings = JsonlReadings::new(storage.readings_path());
    let state_store = JsonStateStore::new(storage.state_path());

    let topics = Topics::new(&config.topic_prefix);
    let client_id = config.client_id();
    let options = build_mqtt_options(&config.mqtt, &client_id, &topics, &config.device_name);
    let (client, eventloop) = AsyncClient::new(options, config.mqtt.request_capacity);

    let node = Arc::new(GrowNode::new(NodeDeps {
        hal: build_hal(&config),
        link: Arc::new(client),
        readings: Arc::new(readings),
        settings: Arc::new(settings),
        state_store: Some(Arc::new(state_store)),
        clock: Arc::new(SystemClock),
        config,
    }));
    let handle = node.spawn(Some(eventloop));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    handle.shutdown().await;

    Ok(())
}
