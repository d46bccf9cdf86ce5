/**
 * DECISION ENGINE - Règles d'automatisation seuils / horaires
 *
 * RÔLE :
 * Transforme (mesures, réglages, état précédent, heure locale) en ControlIntent.
 * Fonction pure : aucune E/S, aucun accès horloge. L'appelant fournit l'heure
 * dans la zone horaire du planning.
 *
 * RÈGLES :
 * - Ventilateur : ON au-dessus de temperature_max, OFF sous temperature_max - 2,
 *   sinon aucun changement (hystérésis)
 * - Lumière : ON dans la fenêtre [start, end[, fenêtre qui peut passer minuit
 * - Arrosage : ON pendant les water_duration premières secondes de water_time:00
 *   (60 s ou plus : toute la minute)
 */

use chrono::{NaiveTime, Timelike};
use tracing::debug;

use crate::models::{ActuatorState, ControlIntent, SensorSnapshot};
use crate::settings::{AutomationConfig, WaterSchedule};

/// Fan hysteresis band below temperature_max (°C)
pub const FAN_HYSTERESIS: f64 = 2.0;

pub fn decide(
    snapshot: &SensorSnapshot,
    config: &AutomationConfig,
    previous: &ActuatorState,
    time_of_day: NaiveTime,
) -> ControlIntent {
    let intent = ControlIntent {
        fan: decide_fan(snapshot.temperature, config),
        light: decide_light(time_of_day.hour(), config),
        water_pump: decide_water(time_of_day, config),
    };

    let changes = intent.changes(previous);
    if !changes.is_empty() {
        debug!(
            "automation at {} ({}°C): {:?}",
            time_of_day.format("%H:%M:%S"),
            snapshot.temperature,
            changes
        );
    }
    intent
}

fn decide_fan(temperature: f64, config: &AutomationConfig) -> Option<bool> {
    if !config.fan_auto {
        return None;
    }
    if temperature > config.temperature_max {
        Some(true)
    } else if temperature < config.temperature_max - FAN_HYSTERESIS {
        Some(false)
    } else {
        None
    }
}

fn decide_light(hour: u32, config: &AutomationConfig) -> Option<bool> {
    if !config.light_auto {
        return None;
    }
    Some(in_light_window(hour, config.light_hours_start, config.light_hours_end))
}

/// Half-open [start, end); wraps past midnight when start > end
pub fn in_light_window(hour: u32, start: u32, end: u32) -> bool {
    if start <= end {
        start <= hour && hour < end
    } else {
        hour >= start || hour < end
    }
}

fn decide_water(time_of_day: NaiveTime, config: &AutomationConfig) -> Option<bool> {
    if !config.water_auto {
        return None;
    }
    match config.water_schedule {
        WaterSchedule::Off => Some(false),
        WaterSchedule::Daily => Some(
            time_of_day.hour() == config.water_time
                && time_of_day.minute() == 0
                && time_of_day.second() < config.water_duration.min(60),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(temperature: f64) -> SensorSnapshot {
        SensorSnapshot {
            temperature,
            humidity: 50.0,
            light_level: 400.0,
            soil_moisture: Some(50.0),
            timestamp: Utc::now(),
        }
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_fan_hysteresis() {
        let config = AutomationConfig::default();
        let off = ActuatorState::all_off(Utc::now());
        let mut on = off.clone();
        on.fan = true;

        assert_eq!(decide(&snapshot(31.0), &config, &off, at(12, 0, 0)).fan, Some(true));
        assert_eq!(decide(&snapshot(27.0), &config, &on, at(12, 0, 0)).fan, Some(false));

        let intent = decide(&snapshot(29.0), &config, &on, at(12, 0, 0));
        assert_eq!(intent.fan, None);
        assert!(intent.resolve(&on).fan);
    }

    #[test]
    fn test_light_window() {
        let config = AutomationConfig::default();
        let prev = ActuatorState::all_off(Utc::now());
        let light = |h| decide(&snapshot(22.0), &config, &prev, at(h, 0, 0)).light;

        assert_eq!(light(10), Some(true));
        assert_eq!(light(20), Some(false));
        assert_eq!(light(6), Some(true));
        assert_eq!(light(18), Some(false));
    }

    #[test]
    fn test_light_window_wraps_midnight() {
        assert!(in_light_window(23, 20, 6));
        assert!(in_light_window(3, 20, 6));
        assert!(!in_light_window(12, 20, 6));
        assert!(!in_light_window(8, 8, 8));
    }

    #[test]
    fn test_daily_watering_window() {
        let config = AutomationConfig {
            water_schedule: WaterSchedule::Daily,
            water_time: 8,
            water_duration: 30,
            ..AutomationConfig::default()
        };
        let prev = ActuatorState::all_off(Utc::now());
        let water = |t| decide(&snapshot(22.0), &config, &prev, t).water_pump;

        assert_eq!(water(at(8, 0, 15)), Some(true));
        assert_eq!(water(at(8, 0, 45)), Some(false));
        assert_eq!(water(at(9, 0, 0)), Some(false));
        assert_eq!(water(at(8, 1, 10)), Some(false));
    }

    #[test]
    fn test_watering_duration_of_a_minute_or_more() {
        let prev = ActuatorState::all_off(Utc::now());
        for duration in [60, 90] {
            let config = AutomationConfig {
                water_schedule: WaterSchedule::Daily,
                water_time: 8,
                water_duration: duration,
                ..AutomationConfig::default()
            };
            let water = |t| decide(&snapshot(22.0), &config, &prev, t).water_pump;
            assert_eq!(water(at(8, 0, 45)), Some(true));
            assert_eq!(water(at(8, 0, 59)), Some(true));
            assert_eq!(water(at(8, 1, 0)), Some(false));
        }
    }

    #[test]
    fn test_disabled_auto_leaves_actuators_alone() {
        let config = AutomationConfig {
            fan_auto: false,
            light_auto: false,
            water_auto: false,
            ..AutomationConfig::default()
        };
        let prev = ActuatorState::all_off(Utc::now());
        assert!(decide(&snapshot(40.0), &config, &prev, at(10, 0, 0)).is_empty());
    }

    #[test]
    fn test_schedule_off_forces_pump_off() {
        let config = AutomationConfig::default();
        let mut prev = ActuatorState::all_off(Utc::now());
        prev.water_pump = true;
        let intent = decide(&snapshot(22.0), &config, &prev, at(8, 0, 0));
        assert_eq!(intent.water_pump, Some(false));
    }
}
