/**
 * GROW NODE - Runtime d'un noeud (capteur ou dashboard)
 *
 * RÔLE :
 * Assemble HAL, réplica, télémétrie, synchroniseur et relais de commandes,
 * et expose l'API consommée par le dashboard :
 * current_sensor_snapshot, current_control_state, set_actuator_intent,
 * history, hourly_rollup, daily_rollup, health.
 *
 * TÂCHES (runtime tokio) :
 * 1. échantillonnage (noeud capteur) : lecture HAL toutes les 30 s (5 s après une erreur)
 *    + ticker d'automatisation (5 s par défaut) sur la dernière mesure
 * 2. I/O transport : boucle d'événements rumqttc + machine à états
 *
 * ARRÊT :
 * signal watch → délai de grâce → join (abort des retardataires)
 * → présence offline + DISCONNECT → toutes les sorties à OFF en dernier
 */

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use rumqttc::{Event, EventLoop, Outgoing};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, ScheduleZone};
use crate::config::{NodeConfig, NodeRole};
use crate::contracts::Topics;
use crate::engine;
use crate::error::{HardwareError, NodeError};
use crate::hal::{Hal, HalKind, SharedHal, SimulatedHal};
use crate::health::{ConnectionState, LinkHealth, NodeHealth};
use crate::models::{Actuator, ActuatorState, SensorSnapshot, UnknownActuator};
use crate::ports::{ControlStateStore, ReadingsRepository, SettingsRepository};
use crate::relay::{CommandRelay, RelayOutcome};
use crate::replica::ControlReplica;
use crate::settings::{initialize_defaults, AutomationConfig, WaterSchedule};
use crate::telemetry::{self, DailyBucket, HourlyBucket, TelemetryStore};
use crate::transport::dispatch::{self, DispatchContext, Dispatched};
use crate::transport::{MqttLink, RetryPolicy, Synchronizer, TransportEvent};

/// Collaborators handed to a node at construction
pub struct NodeDeps {
    pub config: NodeConfig,
    pub link: Arc<dyn MqttLink>,
    /// Sensor node: its relays. Dashboard: optional local fallback.
    pub hal: Option<Box<dyn Hal>>,
    pub readings: Arc<dyn ReadingsRepository>,
    pub settings: Arc<dyn SettingsRepository>,
    pub state_store: Option<Arc<dyn ControlStateStore>>,
    pub clock: Arc<dyn Clock>,
}

pub struct GrowNode {
    config: NodeConfig,
    clock: Arc<dyn Clock>,
    zone: ScheduleZone,
    sync: Arc<Synchronizer>,
    replica: Arc<ControlReplica>,
    telemetry: TelemetryStore,
    relay: CommandRelay,
    settings: Arc<dyn SettingsRepository>,
    hal: Option<SharedHal>,
    hal_kind: Option<HalKind>,
    last_sample_at: Mutex<Option<DateTime<Utc>>>,
}

impl GrowNode {
    pub fn new(deps: NodeDeps) -> Self {
        let NodeDeps {
            config,
            link,
            hal,
            readings,
            settings,
            state_store,
            clock,
        } = deps;
        let now = clock.now();

        let hal = match (config.role, hal) {
            (NodeRole::Sensor, None) => {
                warn!("sensor node started without hardware, using simulation");
                Some(Box::new(SimulatedHal::new()) as Box<dyn Hal>)
            }
            (_, hal) => hal,
        };
        let hal_kind = hal.as_ref().map(|h| h.kind());
        let hal = hal.map(crate::hal::shared);

        let sync = Arc::new(Synchronizer::new(
            link,
            Topics::new(&config.topic_prefix),
            config.role,
            config.device_name.clone(),
            LinkHealth::new(),
        ));
        let replica = Arc::new(match state_store {
            Some(store) => ControlReplica::with_store(store, now),
            None => ControlReplica::new(now),
        });
        let relay = match (config.role, &hal) {
            (NodeRole::Sensor, Some(hal)) => CommandRelay::local(hal.clone(), replica.clone(), sync.clone()),
            (_, fallback) => CommandRelay::peer(fallback.clone(), replica.clone(), sync.clone()),
        };

        if let Err(e) = initialize_defaults(settings.as_ref()) {
            error!("Error initializing settings: {}", e);
        }

        let node = Self {
            zone: config.schedule_zone(),
            config,
            clock,
            sync,
            replica,
            telemetry: TelemetryStore::new(readings),
            relay,
            settings,
            hal,
            hal_kind,
            last_sample_at: Mutex::new(None),
        };
        node.check_automation_interval();
        node
    }

    fn check_automation_interval(&self) {
        if !self.automation_active() {
            return;
        }
        let cfg = AutomationConfig::load(self.settings.as_ref());
        let interval = self.config.sampling.automation_interval_secs;
        if cfg.water_schedule == WaterSchedule::Daily && interval >= cfg.water_duration as u64 {
            warn!(
                "automation interval ({}s) is not shorter than water_duration ({}s), watering may be skipped",
                interval, cfg.water_duration
            );
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn role(&self) -> NodeRole {
        self.config.role
    }

    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.sync
    }

    pub fn replica(&self) -> &Arc<ControlReplica> {
        &self.replica
    }

    pub fn telemetry(&self) -> &TelemetryStore {
        &self.telemetry
    }

    pub fn settings(&self) -> &Arc<dyn SettingsRepository> {
        &self.settings
    }

    /// Only the sensor node reads its hardware; a dashboard fallback HAL
    /// only ever drives relays
    fn sampling_hal(&self) -> Option<SharedHal> {
        match self.config.role {
            NodeRole::Sensor => self.hal.clone(),
            NodeRole::Dashboard => None,
        }
    }

    /// Sensor nodes decide by default, dashboards only when asked to
    pub fn automation_active(&self) -> bool {
        self.config
            .automation_enabled
            .unwrap_or(self.config.role == NodeRole::Sensor)
    }

    // ---- API exposée au dashboard ----

    pub fn current_sensor_snapshot(&self) -> Option<SensorSnapshot> {
        self.telemetry.latest()
    }

    pub fn current_control_state(&self) -> ActuatorState {
        self.replica.snapshot()
    }

    /// Operator change by actuator name ("fan", "light", "water_pump")
    pub async fn set_actuator_intent(&self, name: &str, on: bool) -> Result<RelayOutcome, UnknownActuator> {
        let actuator: Actuator = name.parse()?;
        Ok(self.relay.request(actuator, on, self.clock.now()).await)
    }

    /// `hours` outside 1..=168 reads as 24
    pub fn history(&self, hours: i64) -> Vec<SensorSnapshot> {
        self.telemetry.history(self.clock.now(), telemetry::clamp_hours(hours))
    }

    pub fn hourly_rollup(&self, hours: i64) -> Vec<HourlyBucket> {
        self.telemetry.hourly_rollup(self.clock.now(), telemetry::clamp_hours(hours))
    }

    /// `days` outside 1..=30 reads as 7
    pub fn daily_rollup(&self, days: i64) -> Vec<DailyBucket> {
        self.telemetry.daily_rollup(self.clock.now(), telemetry::clamp_days(days))
    }

    pub fn health(&self) -> NodeHealth {
        self.sync.health().get_health(self.hal_kind)
    }

    // ---- transport ----

    /// Feeds one event through the state machine and the dispatcher
    pub async fn handle_transport_event(&self, event: TransportEvent) -> ConnectionState {
        let state = self.sync.apply_event(&event);
        match event {
            TransportEvent::ConnAck { success: true } => {
                self.replica.reset_peer_watermark();
                let status = (self.config.role == NodeRole::Sensor).then(|| self.replica.snapshot());
                self.sync.on_connected(status.as_ref(), self.clock.now());
            }
            TransportEvent::Publish { topic, payload } => {
                self.handle_inbound(&topic, &payload).await;
            }
            _ => {}
        }
        state
    }

    pub async fn handle_inbound(&self, topic: &str, payload: &[u8]) -> Dispatched {
        let ctx = DispatchContext {
            sync: &self.sync,
            replica: &self.replica,
            telemetry: &self.telemetry,
            relay: &self.relay,
            presence: self.sync.health(),
        };
        dispatch::dispatch(&ctx, topic, payload, self.clock.now()).await
    }

    // ---- ticks ----

    /// Read, record, publish. A failed append drops the tick.
    pub async fn sample_tick(&self) -> Result<SensorSnapshot, NodeError> {
        let Some(hal) = self.sampling_hal() else {
            return Err(HardwareError::Probe("no sensors on this node".into()).into());
        };
        let at = self.monotonic_now();
        let snapshot = tokio::task::spawn_blocking(move || hal.lock().read_sensors(at))
            .await
            .map_err(|e| HardwareError::Worker(e.to_string()))?;

        self.telemetry.record(&snapshot)?;

        if self.sync.is_connected() {
            match self.sync.publish_sensor_data(&snapshot) {
                Ok(()) => info!(
                    "Published sensor data: temp={}°C, humidity={}%, light={}lux",
                    snapshot.temperature, snapshot.humidity, snapshot.light_level
                ),
                Err(e) => warn!("failed to publish sensor data: {}", e),
            }
        } else {
            debug!("offline, sensor data kept locally");
        }
        Ok(snapshot)
    }

    /// Clock steps backwards are clamped to the previous sample time
    fn monotonic_now(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        let mut last = self.last_sample_at.lock();
        let at = match *last {
            Some(prev) if now < prev => {
                warn!("clock went backwards ({} < {}), reusing previous timestamp", now, prev);
                prev
            }
            _ => now,
        };
        *last = Some(at);
        at
    }

    /// One decision cycle on the latest snapshot with freshly loaded settings
    pub async fn automation_tick(&self) -> Vec<(Actuator, bool)> {
        let Some(snapshot) = self.telemetry.latest() else {
            debug!("no sensor data yet, automation skipped");
            return Vec::new();
        };
        let config = AutomationConfig::load(self.settings.as_ref());
        let previous = self.replica.snapshot();
        let now = self.clock.now();

        let intent = engine::decide(&snapshot, &config, &previous, self.zone.time_of_day(now));
        let changes = intent.changes(&previous);
        for &(actuator, on) in &changes {
            let outcome = self.relay.request(actuator, on, now).await;
            info!("automation: {} -> {} ({:?})", actuator, if on { "ON" } else { "OFF" }, outcome);
        }
        changes
    }

    // ---- cycle de vie ----

    /// Starts the worker tasks. Without an event loop (tests) the transport is
    /// driven through handle_transport_event.
    pub fn spawn(self: &Arc<Self>, eventloop: Option<EventLoop>) -> NodeHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut workers = Vec::new();

        if self.sampling_hal().is_some() || self.automation_active() {
            workers.push(tokio::spawn(sampling_loop(self.clone(), shutdown_rx.clone())));
        }
        if let Some(eventloop) = eventloop {
            workers.push(tokio::spawn(transport_loop(self.clone(), eventloop, shutdown_rx)));
        }
        info!(
            "{:?} node '{}' started ({} workers)",
            self.config.role,
            self.config.device_name,
            workers.len()
        );

        NodeHandle {
            node: self.clone(),
            shutdown: shutdown_tx,
            workers,
        }
    }

    /// Offline presence, disconnect, then every output off
    pub async fn finalize(&self) {
        let now = self.clock.now();
        self.sync.go_offline(now);

        if let Some(hal) = self.hal.clone() {
            if let Err(e) = tokio::task::spawn_blocking(move || hal.lock().all_off()).await {
                error!("failed to switch outputs off: {}", e);
            }
        }
        self.replica.reset_all_off(now);
        info!("node stopped, all outputs off");
    }
}

async fn sampling_loop(node: Arc<GrowNode>, mut shutdown: watch::Receiver<bool>) {
    let sampling = node.sampling_hal().is_some();
    let automation = node.automation_active();
    let conf = node.config.sampling.clone();

    let mut next_sample = Instant::now();
    let mut ticker = tokio::time::interval(conf.automation_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep_until(next_sample), if sampling => {
                let wait = match node.sample_tick().await {
                    Ok(_) => conf.interval(),
                    Err(e) => {
                        error!("Error in sensor loop: {}", e);
                        conf.error_backoff()
                    }
                };
                next_sample = Instant::now() + wait;
            }
            _ = ticker.tick(), if automation => {
                node.automation_tick().await;
            }
        }
    }
    debug!("sampling loop stopped");
}

async fn transport_loop(node: Arc<GrowNode>, mut eventloop: EventLoop, mut shutdown: watch::Receiver<bool>) {
    let mut retry = RetryPolicy::from_conf(&node.config.mqtt);
    node.sync.begin_connect();

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            polled = eventloop.poll() => {
                let event = match polled {
                    Ok(event) => match TransportEvent::from_mqtt(&event) {
                        Some(event) => event,
                        None => continue,
                    },
                    Err(e) => TransportEvent::Error(e.to_string()),
                };

                match node.handle_transport_event(event).await {
                    ConnectionState::Connected => retry.reset(),
                    ConnectionState::Disconnected => {
                        let delay = retry.next_delay();
                        warn!("MQTT unavailable, retrying in {:?}", delay);
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        node.sync.begin_reconnect();
                    }
                    _ => {}
                }
            }
        }
    }

    // offline + DISCONNECT doivent sortir avant de lâcher la boucle
    if node.sync.is_connected() {
        node.sync.go_offline(node.clock.now());
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("timed out flushing offline presence");
        }
    }
    debug!("transport loop stopped");
}

/// Start/stop handle for a running node
pub struct NodeHandle {
    node: Arc<GrowNode>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn node(&self) -> &Arc<GrowNode> {
        &self.node
    }

    /// Signals the workers, waits up to the grace window, aborts stragglers,
    /// then finalizes the node
    pub async fn shutdown(self) {
        let grace = self.node.config.shutdown_grace();
        let _ = self.shutdown.send(true);

        let aborts: Vec<_> = self.workers.iter().map(|w| w.abort_handle()).collect();
        match tokio::time::timeout(grace, join_all(self.workers)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!("worker ended abnormally: {}", e);
                    }
                }
            }
            Err(_) => {
                warn!("workers still running after {:?}, aborting", grace);
                for handle in aborts {
                    handle.abort();
                }
            }
        }

        self.node.finalize().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::ports::{MemoryReadings, MemorySettings};
    use crate::test_support::RecordingLink;

    fn node(role: NodeRole, link: Arc<RecordingLink>, readings: Arc<MemoryReadings>) -> Arc<GrowNode> {
        let config = NodeConfig {
            role,
            device_name: "test-node".into(),
            ..NodeConfig::default()
        };
        Arc::new(GrowNode::new(NodeDeps {
            config,
            link,
            hal: Some(Box::new(SimulatedHal::seeded(9))),
            readings,
            settings: Arc::new(MemorySettings::new()),
            state_store: None,
            clock: Arc::new(SystemClock),
        }))
    }

    #[tokio::test]
    async fn test_sample_tick_records_and_publishes_when_connected() {
        let link = Arc::new(RecordingLink::default());
        let readings = Arc::new(MemoryReadings::new());
        let node = node(NodeRole::Sensor, link.clone(), readings.clone());

        node.sample_tick().await.unwrap();
        assert_eq!(readings.len(), 1);
        assert!(link.published_on("opengrow/sensors/data").is_empty());

        node.handle_transport_event(TransportEvent::ConnAck { success: true }).await;
        node.sample_tick().await.unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(link.published_on("opengrow/sensors/data").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_append_drops_tick() {
        let link = Arc::new(RecordingLink::default());
        let readings = Arc::new(MemoryReadings::new());
        let node = node(NodeRole::Sensor, link.clone(), readings.clone());
        node.handle_transport_event(TransportEvent::ConnAck { success: true }).await;

        readings.set_unavailable(true);
        assert!(matches!(node.sample_tick().await, Err(NodeError::Persistence(_))));
        assert!(link.published_on("opengrow/sensors/data").is_empty());
    }

    #[tokio::test]
    async fn test_settings_are_seeded() {
        let link = Arc::new(RecordingLink::default());
        let node = node(NodeRole::Dashboard, link, Arc::new(MemoryReadings::new()));
        assert_eq!(node.settings().get_or("water_schedule", "?"), "off");
        assert!(!node.automation_active());
    }

    #[tokio::test]
    async fn test_unknown_actuator_is_rejected() {
        let link = Arc::new(RecordingLink::default());
        let node = node(NodeRole::Sensor, link, Arc::new(MemoryReadings::new()));
        assert!(node.set_actuator_intent("heater", true).await.is_err());
        assert_eq!(
            node.set_actuator_intent("light", true).await.unwrap(),
            RelayOutcome::AppliedLocally
        );
        assert!(node.current_control_state().light);
    }

    #[tokio::test]
    async fn test_shutdown_turns_everything_off() {
        let link = Arc::new(RecordingLink::default());
        let node = node(NodeRole::Sensor, link.clone(), Arc::new(MemoryReadings::new()));
        node.handle_transport_event(TransportEvent::ConnAck { success: true }).await;
        node.set_actuator_intent("fan", true).await.unwrap();

        let handle = node.spawn(None);
        handle.shutdown().await;

        assert!(!node.current_control_state().fan);
        assert!(*link.disconnected.lock());
        let presence = link.published_on("opengrow/system/status");
        assert_eq!(presence.last().unwrap()["status"], "offline");
    }
}
