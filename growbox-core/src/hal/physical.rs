//! Linux sysfs backend
//!
//! Relays and the soil probe go through the legacy GPIO class interface
//! (`class/gpio/{export,gpioN/direction,gpioN/value}`). Temperature, humidity and
//! light come from the kernel IIO drivers (dht11 handles DHT22, bh1750), which
//! report in milli-units and lux respectively.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use super::{
    round1, Hal, HalKind, FALLBACK_HUMIDITY, FALLBACK_LIGHT_LEVEL, FALLBACK_SOIL_MOISTURE,
    FALLBACK_TEMPERATURE,
};
use crate::config::{HardwareConf, PinConfig};
use crate::error::HardwareError;
use crate::models::{Actuator, ActuatorState, SensorSnapshot};

pub struct PhysicalHal {
    gpio_root: PathBuf,
    dht_dir: PathBuf,
    light_dir: PathBuf,
    pins: PinConfig,
    active_low: bool,
    outputs: ActuatorState,
}

impl PhysicalHal {
    /// Exports and configures every pin; fails if the GPIO class is missing
    pub fn probe(conf: &HardwareConf) -> Result<Self, HardwareError> {
        let gpio_root = conf.sysfs_root.join("class/gpio");
        if !gpio_root.join("export").exists() {
            return Err(HardwareError::Probe(format!(
                "no GPIO sysfs interface at {}",
                gpio_root.display()
            )));
        }

        let iio_root = conf.sysfs_root.join("bus/iio/devices");
        let hal = Self {
            dht_dir: iio_root.join(&conf.dht_iio_device),
            light_dir: iio_root.join(&conf.light_iio_device),
            gpio_root,
            pins: conf.pins.clone(),
            active_low: conf.active_low,
            outputs: ActuatorState::all_off(Utc::now()),
        };

        for actuator in Actuator::ALL {
            let pin = hal.pin(actuator);
            hal.export(pin)?;
            write_sysfs(&hal.pin_file(pin, "direction"), "out")?;
            hal.write_level(pin, false)?;
        }
        if let Some(pin) = hal.pins.soil_moisture {
            hal.export(pin)?;
            write_sysfs(&hal.pin_file(pin, "direction"), "in")?;
        }

        for (name, dir) in [("DHT22", &hal.dht_dir), ("BH1750", &hal.light_dir)] {
            if !dir.exists() {
                warn!("{} IIO device not found at {}, fallback values will be used", name, dir.display());
            }
        }

        Ok(hal)
    }

    fn pin(&self, actuator: Actuator) -> u32 {
        match actuator {
            Actuator::Fan => self.pins.fan,
            Actuator::Light => self.pins.light,
            Actuator::WaterPump => self.pins.water_pump,
        }
    }

    fn pin_file(&self, pin: u32, attr: &str) -> PathBuf {
        self.gpio_root.join(format!("gpio{pin}")).join(attr)
    }

    fn export(&self, pin: u32) -> Result<(), HardwareError> {
        let pin_dir = self.gpio_root.join(format!("gpio{pin}"));
        if pin_dir.exists() {
            return Ok(());
        }
        write_sysfs(&self.gpio_root.join("export"), &pin.to_string())?;
        if !pin_dir.exists() {
            return Err(HardwareError::Probe(format!("gpio{pin} did not appear after export")));
        }
        Ok(())
    }

    fn write_level(&self, pin: u32, on: bool) -> Result<(), HardwareError> {
        let high = on != self.active_low;
        write_sysfs(&self.pin_file(pin, "value"), if high { "1" } else { "0" })
    }

    fn read_dht(&self) -> Result<(f64, f64), HardwareError> {
        let temperature = read_number(&self.dht_dir.join("in_temp_input"), "temperature")? / 1000.0;
        let humidity =
            read_number(&self.dht_dir.join("in_humidityrelative_input"), "humidity")? / 1000.0;
        Ok((round1(temperature), round1(humidity)))
    }

    fn read_light(&self) -> Result<f64, HardwareError> {
        let processed = self.light_dir.join("in_illuminance_input");
        let lux = if processed.exists() {
            read_number(&processed, "light_level")?
        } else {
            let raw = read_number(&self.light_dir.join("in_illuminance_raw"), "light_level")?;
            let scale = read_number(&self.light_dir.join("in_illuminance_scale"), "light_level")
                .unwrap_or(1.0);
            raw * scale
        };
        Ok(round1(lux))
    }

    /// Digital probe: high = dry (0 %), low = wet (100 %)
    fn read_soil(&self, pin: u32) -> Result<f64, HardwareError> {
        let level = read_number(&self.pin_file(pin, "value"), "soil_moisture")?;
        Ok(if level > 0.0 { 0.0 } else { 100.0 })
    }
}

impl Hal for PhysicalHal {
    fn kind(&self) -> HalKind {
        HalKind::Physical
    }

    fn read_sensors(&mut self, at: DateTime<Utc>) -> SensorSnapshot {
        let (temperature, humidity) = self.read_dht().unwrap_or_else(|e| {
            warn!("DHT22 read failed, using fallback values: {}", e);
            (FALLBACK_TEMPERATURE, FALLBACK_HUMIDITY)
        });
        let light_level = self.read_light().unwrap_or_else(|e| {
            warn!("BH1750 read failed, using fallback value: {}", e);
            FALLBACK_LIGHT_LEVEL
        });
        let soil_moisture = self.pins.soil_moisture.map(|pin| {
            self.read_soil(pin).unwrap_or_else(|e| {
                warn!("soil moisture read failed, using fallback value: {}", e);
                FALLBACK_SOIL_MOISTURE
            })
        });

        SensorSnapshot {
            temperature,
            humidity,
            light_level,
            soil_moisture,
            timestamp: at,
        }
    }

    fn set_actuator(&mut self, actuator: Actuator, on: bool) -> bool {
        match self.write_level(self.pin(actuator), on) {
            Ok(()) => {
                if self.outputs.set(actuator, on) {
                    debug!("relay {} -> {}", actuator, if on { "ON" } else { "OFF" });
                }
            }
            Err(e) => error!("failed to drive {}: {}", actuator, e),
        }
        on
    }

    fn all_off(&mut self) {
        for actuator in Actuator::ALL {
            if let Err(e) = self.write_level(self.pin(actuator), false) {
                error!("failed to switch off {}: {}", actuator, e);
            }
            self.outputs.set(actuator, false);
        }
    }
}

fn write_sysfs(path: &Path, value: &str) -> Result<(), HardwareError> {
    fs::write(path, value).map_err(|source| HardwareError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn read_number(path: &Path, sensor: &'static str) -> Result<f64, HardwareError> {
    let read_err = |reason: String| HardwareError::Read {
        sensor,
        path: path.to_path_buf(),
        reason,
    };
    let raw = fs::read_to_string(path).map_err(|e| read_err(e.to_string()))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|e| read_err(format!("'{}': {}", raw.trim(), e)))
}
