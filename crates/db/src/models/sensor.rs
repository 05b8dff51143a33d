//! Sensor definition rows.

use nh3_core::sensor::SensorConfig;
use nh3_core::types::{SensorId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `sensors` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SensorRow {
    pub id: SensorId,
    pub name: String,
    pub address: i64,
    pub unit: String,
    pub min_value: f64,
    pub max_value: f64,
    pub warning_threshold: f64,
    pub alarm_threshold: f64,
    pub enabled: bool,
    pub updated_at: Timestamp,
}

impl SensorRow {
    /// Whether the stored row still matches the given configuration.
    pub fn matches(&self, config: &SensorConfig) -> bool {
        self.id == config.id
            && self.name == config.name
            && self.address == i64::from(config.address)
            && self.unit == config.unit
            && self.min_value == config.min_value
            && self.max_value == config.max_value
            && self.warning_threshold == config.warning_threshold
            && self.alarm_threshold == config.alarm_threshold
            && self.enabled == config.enabled
    }
}
