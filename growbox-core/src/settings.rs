//! Automation settings sourced from the settings repository
//!
//! Values are stored as strings (the dashboard edits them as text). They are
//! re-read at the start of every decision cycle; anything unparsable falls back
//! to its documented default with a warning instead of failing the cycle.

use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::PersistenceError;
use crate::ports::SettingsRepository;

/// Default settings (name, value)
pub const DEFAULT_SETTINGS: [(&str, &str); 12] = [
    ("temperature_min", "18.0"),
    ("temperature_max", "30.0"),
    ("humidity_min", "40.0"),
    ("humidity_max", "80.0"),
    ("light_hours_start", "6"), // 6 AM
    ("light_hours_end", "18"),  // 6 PM
    ("water_schedule", "off"),  // off, daily
    ("water_time", "8"),        // 8 AM
    ("water_duration", "30"),   // seconds
    ("fan_auto", "true"),
    ("light_auto", "true"),
    ("water_auto", "true"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaterSchedule {
    Off,
    Daily,
}

/// Immutable per-cycle view of the automation settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutomationConfig {
    pub temperature_min: f64,
    pub temperature_max: f64,
    pub humidity_min: f64,
    pub humidity_max: f64,
    pub light_hours_start: u32,
    pub light_hours_end: u32,
    pub water_schedule: WaterSchedule,
    pub water_time: u32,
    /// seconds
    pub water_duration: u32,
    pub fan_auto: bool,
    pub light_auto: bool,
    pub water_auto: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            temperature_min: 18.0,
            temperature_max: 30.0,
            humidity_min: 40.0,
            humidity_max: 80.0,
            light_hours_start: 6,
            light_hours_end: 18,
            water_schedule: WaterSchedule::Off,
            water_time: 8,
            water_duration: 30,
            fan_auto: true,
            light_auto: true,
            water_auto: true,
        }
    }
}

impl AutomationConfig {
    /// Reads and validates every setting; never fails
    pub fn load(settings: &dyn SettingsRepository) -> Self {
        let d = Self::default();
        let raw = |name: &str| -> Option<String> {
            match settings.get(name) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Error retrieving setting '{}': {}, using default", name, e);
                    None
                }
            }
        };

        Self {
            temperature_min: parse_f64(raw("temperature_min"), "temperature_min", d.temperature_min),
            temperature_max: parse_f64(raw("temperature_max"), "temperature_max", d.temperature_max),
            humidity_min: parse_f64(raw("humidity_min"), "humidity_min", d.humidity_min),
            humidity_max: parse_f64(raw("humidity_max"), "humidity_max", d.humidity_max),
            light_hours_start: parse_ranged(raw("light_hours_start"), "light_hours_start", 0, 23, d.light_hours_start),
            light_hours_end: parse_ranged(raw("light_hours_end"), "light_hours_end", 0, 24, d.light_hours_end),
            water_schedule: parse_schedule(raw("water_schedule")),
            water_time: parse_ranged(raw("water_time"), "water_time", 0, 23, d.water_time),
            water_duration: parse_ranged(raw("water_duration"), "water_duration", 0, u32::MAX, d.water_duration),
            fan_auto: parse_flag(raw("fan_auto"), "fan_auto", d.fan_auto),
            light_auto: parse_flag(raw("light_auto"), "light_auto", d.light_auto),
            water_auto: parse_flag(raw("water_auto"), "water_auto", d.water_auto),
        }
    }
}

fn parse_f64(raw: Option<String>, name: &str, default: f64) -> f64 {
    let Some(raw) = raw else { return default };
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => {
            warn!("invalid value '{}' for {}, falling back to {}", raw, name, default);
            default
        }
    }
}

fn parse_ranged<T>(raw: Option<String>, name: &str, min: T, max: T, default: T) -> T
where
    T: FromStr + PartialOrd + Copy + std::fmt::Display,
{
    let Some(raw) = raw else { return default };
    match raw.trim().parse::<T>() {
        Ok(v) if v >= min && v <= max => v,
        _ => {
            warn!("invalid value '{}' for {} (expected {}..={}), falling back to {}", raw, name, min, max, default);
            default
        }
    }
}

fn parse_flag(raw: Option<String>, name: &str, default: bool) -> bool {
    let Some(raw) = raw else { return default };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => true,
        "false" => false,
        _ => {
            warn!("invalid value '{}' for {}, falling back to {}", raw, name, default);
            default
        }
    }
}

fn parse_schedule(raw: Option<String>) -> WaterSchedule {
    let Some(raw) = raw else { return WaterSchedule::Off };
    match raw.trim().to_ascii_lowercase().as_str() {
        "off" => WaterSchedule::Off,
        "daily" => WaterSchedule::Daily,
        other => {
            warn!("unsupported water_schedule '{}', treating as off", other);
            WaterSchedule::Off
        }
    }
}

/// Seeds missing settings with their defaults; returns how many were added
pub fn initialize_defaults(settings: &dyn SettingsRepository) -> Result<usize, PersistenceError> {
    let mut added = 0;
    for (name, value) in DEFAULT_SETTINGS {
        if settings.get(name)?.is_none() {
            settings.set(name, value)?;
            added += 1;
        }
    }
    info!("Settings initialized ({} defaults added)", added);
    Ok(added)
}

/// All settings as a pretty JSON object
pub fn export_settings(settings: &dyn SettingsRepository) -> Result<String, PersistenceError> {
    let all = settings.all()?;
    Ok(serde_json::to_string_pretty(&all)?)
}

/// Imports a JSON object of settings; returns how many were written
pub fn import_settings(settings: &dyn SettingsRepository, json: &str) -> Result<usize, PersistenceError> {
    let parsed: HashMap<String, serde_json::Value> = serde_json::from_str(json)?;
    let mut written = 0;
    for (name, value) in parsed {
        let text = match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        settings.set(&name, &text)?;
        written += 1;
    }
    Ok(written)
}
