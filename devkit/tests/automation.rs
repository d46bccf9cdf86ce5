//! Boucle d'automatisation de bout en bout : HAL espion, horloge manuelle

use chrono::{Duration, TimeZone, Utc};
use growbox_core::config::NodeRole;
use growbox_core::contracts::Channel;
use growbox_core::{Actuator, NodeError};
use growbox_devkit::{Readings, TestHarness};

#[tokio::test]
async fn test_fan_follows_temperature_with_hysteresis() {
    let harness = TestHarness::sensor();
    let hal = harness.hal.clone().unwrap();

    hal.set_temperature(31.0);
    harness.node.sample_tick().await.unwrap();
    let changes = harness.node.automation_tick().await;
    assert!(changes.contains(&(Actuator::Fan, true)));
    assert!(hal.actuator_calls().contains(&(Actuator::Fan, true)));

    // 29 °C : dans la bande d'hystérésis, le ventilateur reste allumé
    hal.set_temperature(29.0);
    harness.clock.advance(Duration::seconds(30));
    harness.node.sample_tick().await.unwrap();
    assert!(harness.node.automation_tick().await.is_empty());
    assert!(harness.node.current_control_state().fan);

    hal.set_temperature(27.0);
    harness.clock.advance(Duration::seconds(30));
    harness.node.sample_tick().await.unwrap();
    assert_eq!(harness.node.automation_tick().await, vec![(Actuator::Fan, false)]);
}

#[tokio::test]
async fn test_light_follows_schedule_window() {
    let harness = TestHarness::sensor();

    harness.node.sample_tick().await.unwrap();
    let changes = harness.node.automation_tick().await;
    assert!(changes.contains(&(Actuator::Light, true)));

    harness.clock.set(Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap());
    assert_eq!(harness.node.automation_tick().await, vec![(Actuator::Light, false)]);
}

#[tokio::test]
async fn test_daily_watering_window() {
    let harness = TestHarness::build(
        NodeRole::Sensor,
        true,
        &[("water_schedule", "daily"), ("water_time", "8"), ("water_duration", "30"), ("light_auto", "false")],
    );
    harness.clock.set(Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 10).unwrap());
    harness.node.sample_tick().await.unwrap();

    assert_eq!(harness.node.automation_tick().await, vec![(Actuator::WaterPump, true)]);

    harness.clock.advance(Duration::seconds(30));
    assert_eq!(harness.node.automation_tick().await, vec![(Actuator::WaterPump, false)]);

    let hal = harness.hal.as_ref().unwrap();
    assert_eq!(
        hal.actuator_calls(),
        vec![(Actuator::WaterPump, true), (Actuator::WaterPump, false)]
    );
}

#[tokio::test]
async fn test_watering_for_a_full_minute() {
    let harness = TestHarness::build(
        NodeRole::Sensor,
        true,
        &[("water_schedule", "daily"), ("water_time", "8"), ("water_duration", "60"), ("light_auto", "false")],
    );
    harness.clock.set(Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 45).unwrap());
    harness.node.sample_tick().await.unwrap();

    assert_eq!(harness.node.automation_tick().await, vec![(Actuator::WaterPump, true)]);

    harness.clock.advance(Duration::seconds(15));
    assert_eq!(harness.node.automation_tick().await, vec![(Actuator::WaterPump, false)]);
}

#[tokio::test]
async fn test_disabled_automation_leaves_outputs_alone() {
    let harness = TestHarness::build(
        NodeRole::Sensor,
        true,
        &[("fan_auto", "false"), ("light_auto", "false"), ("water_auto", "false")],
    );
    harness.hal.as_ref().unwrap().set_temperature(40.0);
    harness.node.set_actuator_intent("light", true).await.unwrap();
    harness.node.sample_tick().await.unwrap();

    assert!(harness.node.automation_tick().await.is_empty());
    let state = harness.node.current_control_state();
    assert!(!state.fan);
    assert!(state.light);
}

#[tokio::test]
async fn test_automation_waits_for_first_reading() {
    let harness = TestHarness::sensor();
    assert!(harness.node.automation_tick().await.is_empty());
    assert!(harness.hal.as_ref().unwrap().actuator_calls().is_empty());
}

#[tokio::test]
async fn test_sample_publishes_readings_when_connected() {
    let harness = TestHarness::sensor();
    harness.hal.as_ref().unwrap().set_readings(Readings {
        temperature: 25.5,
        humidity: 60.0,
        light_level: 520.0,
        soil_moisture: None,
    });

    harness.node.sample_tick().await.unwrap();
    assert!(harness.published(Channel::SensorData).unwrap().is_empty());

    harness.connect().await;
    harness.clock.advance(Duration::seconds(30));
    harness.node.sample_tick().await.unwrap();

    let data = harness.last_published(Channel::SensorData).unwrap().unwrap();
    assert_eq!(data["temperature"], 25.5);
    assert!(data["soil_moisture"].is_null());
    assert_eq!(harness.readings.len(), 2);
}

#[tokio::test]
async fn test_failed_append_drops_the_tick() {
    let harness = TestHarness::sensor();
    harness.connect().await;
    harness.readings.set_unavailable(true);

    let result = harness.node.sample_tick().await;
    assert!(matches!(result, Err(NodeError::Persistence(_))));
    assert!(harness.published(Channel::SensorData).unwrap().is_empty());
    assert!(harness.node.current_sensor_snapshot().is_none());
}

#[tokio::test]
async fn test_clock_step_back_keeps_timestamps_monotonic() {
    let harness = TestHarness::sensor();

    let first = harness.node.sample_tick().await.unwrap();
    harness.clock.advance(Duration::minutes(-5));
    let second = harness.node.sample_tick().await.unwrap();
    assert!(second.timestamp >= first.timestamp);
}

#[tokio::test]
async fn test_dashboard_automation_is_off_by_default() {
    let harness = TestHarness::build(NodeRole::Dashboard, false, &[]);
    // désactivée par défaut sur un dashboard
    assert!(!harness.node.automation_active());
}
