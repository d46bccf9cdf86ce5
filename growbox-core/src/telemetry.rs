//! Telemetry store & aggregator
//!
//! Raw snapshots go to the readings repository, one per sampling tick. Rollups
//! are derived on request and never persisted. A metric without data in a
//! bucket reads as `None`, never as 0.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::error;

use crate::contracts::wire_time;
use crate::error::PersistenceError;
use crate::models::SensorSnapshot;
use crate::ports::{ReadingsRepository, TimeRange};

pub const DEFAULT_HISTORY_HOURS: u32 = 24;
pub const MAX_HISTORY_HOURS: u32 = 168;
pub const DEFAULT_ROLLUP_DAYS: u32 = 7;
pub const MAX_ROLLUP_DAYS: u32 = 30;

/// Out-of-range hour counts fall back to 24
pub fn clamp_hours(hours: i64) -> u32 {
    if (1..=MAX_HISTORY_HOURS as i64).contains(&hours) {
        hours as u32
    } else {
        DEFAULT_HISTORY_HOURS
    }
}

/// Out-of-range day counts fall back to 7
pub fn clamp_days(days: i64) -> u32 {
    if (1..=MAX_ROLLUP_DAYS as i64).contains(&days) {
        days as u32
    } else {
        DEFAULT_ROLLUP_DAYS
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyBucket {
    #[serde(with = "wire_time")]
    pub period_start: DateTime<Utc>,
    pub samples: usize,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub light_level: Option<f64>,
    pub soil_moisture: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBucket {
    pub date: NaiveDate,
    pub samples: usize,
    pub temperature: Option<MetricSummary>,
    pub humidity: Option<MetricSummary>,
    pub light_level: Option<MetricSummary>,
    pub soil_moisture: Option<MetricSummary>,
}

#[derive(Debug, Default, Clone, Copy)]
struct MetricAcc {
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
}

impl MetricAcc {
    fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    fn summary(&self) -> Option<MetricSummary> {
        self.avg().map(|avg| MetricSummary {
            min: self.min,
            max: self.max,
            avg,
        })
    }
}

#[derive(Debug, Default)]
struct BucketAcc {
    samples: usize,
    temperature: MetricAcc,
    humidity: MetricAcc,
    light_level: MetricAcc,
    soil_moisture: MetricAcc,
}

impl BucketAcc {
    fn push(&mut self, s: &SensorSnapshot) {
        self.samples += 1;
        self.temperature.push(s.temperature);
        self.humidity.push(s.humidity);
        self.light_level.push(s.light_level);
        if let Some(soil) = s.soil_moisture {
            self.soil_moisture.push(soil);
        }
    }
}

fn floor_to_hour(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

/// Groups by UTC hour, ascending
pub fn hourly_buckets(snapshots: &[SensorSnapshot]) -> Vec<HourlyBucket> {
    let mut groups: BTreeMap<DateTime<Utc>, BucketAcc> = BTreeMap::new();
    for s in snapshots {
        groups.entry(floor_to_hour(s.timestamp)).or_default().push(s);
    }
    groups
        .into_iter()
        .map(|(period_start, acc)| HourlyBucket {
            period_start,
            samples: acc.samples,
            temperature: acc.temperature.avg(),
            humidity: acc.humidity.avg(),
            light_level: acc.light_level.avg(),
            soil_moisture: acc.soil_moisture.avg(),
        })
        .collect()
}

/// Groups by UTC calendar date, ascending
pub fn daily_buckets(snapshots: &[SensorSnapshot]) -> Vec<DailyBucket> {
    let mut groups: BTreeMap<NaiveDate, BucketAcc> = BTreeMap::new();
    for s in snapshots {
        groups.entry(s.timestamp.date_naive()).or_default().push(s);
    }
    groups
        .into_iter()
        .map(|(date, acc)| DailyBucket {
            date,
            samples: acc.samples,
            temperature: acc.temperature.summary(),
            humidity: acc.humidity.summary(),
            light_level: acc.light_level.summary(),
            soil_moisture: acc.soil_moisture.summary(),
        })
        .collect()
}

pub struct TelemetryStore {
    readings: Arc<dyn ReadingsRepository>,
    latest: Mutex<Option<SensorSnapshot>>,
}

impl TelemetryStore {
    pub fn new(readings: Arc<dyn ReadingsRepository>) -> Self {
        Self {
            readings,
            latest: Mutex::new(None),
        }
    }

    /// Appends one snapshot. No retry: on error the caller drops the tick.
    pub fn record(&self, snapshot: &SensorSnapshot) -> Result<(), PersistenceError> {
        self.readings.append(snapshot)?;
        let mut latest = self.latest.lock();
        if latest.as_ref().map_or(true, |l| l.timestamp <= snapshot.timestamp) {
            *latest = Some(snapshot.clone());
        }
        Ok(())
    }

    /// Most recent snapshot (cache first, then the repository)
    pub fn latest(&self) -> Option<SensorSnapshot> {
        if let Some(cached) = self.latest.lock().clone() {
            return Some(cached);
        }
        match self.readings.latest() {
            Ok(latest) => latest,
            Err(e) => {
                error!("Error getting latest reading: {}", e);
                None
            }
        }
    }

    /// Snapshots in [now - hours, now], ascending
    pub fn history(&self, now: DateTime<Utc>, hours: u32) -> Vec<SensorSnapshot> {
        self.query(TimeRange::last_hours(now, hours))
    }

    pub fn hourly_rollup(&self, now: DateTime<Utc>, hours: u32) -> Vec<HourlyBucket> {
        hourly_buckets(&self.history(now, hours))
    }

    pub fn daily_rollup(&self, now: DateTime<Utc>, days: u32) -> Vec<DailyBucket> {
        let range = TimeRange::new(now - Duration::days(days as i64), now);
        daily_buckets(&self.query(range))
    }

    fn query(&self, range: TimeRange) -> Vec<SensorSnapshot> {
        match self.readings.query(&range) {
            Ok(snapshots) => snapshots,
            Err(e) => {
                error!("Error getting readings for {} .. {}: {}", range.start, range.end, e);
                Vec::new()
            }
        }
    }
}
