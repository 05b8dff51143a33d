//! Sensor configuration and the registry that owns it.
//!
//! Sensor definitions are validated once, when the registry is built. The
//! acquisition loop only ever sees a validated, immutable view; changes go
//! through [`SensorRegistry::replace`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::CoreError;
use crate::severity::{classify, Severity};
use crate::types::SensorId;

/// Highest valid Modbus RTU slave address.
pub const MAX_BUS_ADDRESS: u8 = 247;

/// Number of sensors in the factory configuration.
pub const DEFAULT_SENSOR_COUNT: i64 = 10;

/// Default unit of measurement for ammonia concentration.
pub const DEFAULT_UNIT: &str = "ppm";

// ---------------------------------------------------------------------------
// SensorConfig
// ---------------------------------------------------------------------------

/// Static configuration of one ammonia sensor on the field bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_sensor_ranges"))]
pub struct SensorConfig {
    pub id: SensorId,
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Slave address on the bus (1..=247).
    #[validate(range(min = 1, max = 247))]
    pub address: u8,
    /// Input register holding the raw measurement.
    #[serde(default)]
    pub register: u16,
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Multiplier applied to the raw register value.
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Offset added after scaling.
    #[serde(default)]
    pub offset: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub warning_threshold: f64,
    pub alarm_threshold: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_unit() -> String {
    DEFAULT_UNIT.to_string()
}

fn default_scale() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

fn validate_sensor_ranges(sensor: &SensorConfig) -> Result<(), ValidationError> {
    let numbers = [
        sensor.scale,
        sensor.offset,
        sensor.min_value,
        sensor.max_value,
        sensor.warning_threshold,
        sensor.alarm_threshold,
    ];
    if numbers.iter().any(|v| !v.is_finite()) {
        return Err(range_error("all numeric fields must be finite"));
    }
    if sensor.scale == 0.0 {
        return Err(range_error("scale must be non-zero"));
    }
    if sensor.min_value >= sensor.max_value {
        return Err(range_error("min_value must be less than max_value"));
    }
    if sensor.warning_threshold >= sensor.alarm_threshold {
        return Err(range_error(
            "warning_threshold must be less than alarm_threshold",
        ));
    }
    Ok(())
}

fn range_error(message: &'static str) -> ValidationError {
    ValidationError::new("sensor_ranges").with_message(message.into())
}

impl SensorConfig {
    /// Factory definition used when no configuration file is present.
    ///
    /// Sensor `n` sits on bus address `n`, measures 0..100 ppm, warns at 25
    /// and alarms at 50.
    pub fn factory(id: SensorId) -> Self {
        Self {
            id,
            name: format!("Sensor {id}"),
            address: u8::try_from(id).unwrap_or(MAX_BUS_ADDRESS),
            register: 0,
            unit: default_unit(),
            scale: default_scale(),
            offset: 0.0,
            min_value: 0.0,
            max_value: 100.0,
            warning_threshold: 25.0,
            alarm_threshold: 50.0,
            enabled: true,
        }
    }

    /// Convert a raw register value into engineering units.
    ///
    /// Applies scale and offset, rounds to two decimals and clamps the result
    /// into `[min_value, max_value]`.
    pub fn to_engineering(&self, raw: f64) -> f64 {
        let scaled = raw * self.scale + self.offset;
        let rounded = (scaled * 100.0).round() / 100.0;
        rounded.clamp(self.min_value, self.max_value)
    }

    /// Classify an engineering value against this sensor's thresholds.
    pub fn severity(&self, value: f64) -> Severity {
        classify(value, self.warning_threshold, self.alarm_threshold)
    }

    /// The threshold crossed by a reading of the given severity, if any.
    pub fn threshold_for(&self, severity: Severity) -> Option<f64> {
        match severity {
            Severity::Normal => None,
            Severity::Warning => Some(self.warning_threshold),
            Severity::Alarm => Some(self.alarm_threshold),
        }
    }
}

// ---------------------------------------------------------------------------
// SensorRegistry
// ---------------------------------------------------------------------------

/// The validated set of configured sensors, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct SensorRegistry {
    sensors: Vec<SensorConfig>,
}

impl SensorRegistry {
    /// Build a registry, validating every sensor and rejecting duplicate ids
    /// or bus addresses.
    pub fn new(mut sensors: Vec<SensorConfig>) -> Result<Self, CoreError> {
        let mut ids = HashSet::new();
        let mut addresses = HashSet::new();

        for sensor in &sensors {
            sensor
                .validate()
                .map_err(|e| CoreError::Validation(format!("sensor {}: {e}", sensor.id)))?;
            if !ids.insert(sensor.id) {
                return Err(CoreError::Conflict(format!(
                    "duplicate sensor id {}",
                    sensor.id
                )));
            }
            if !addresses.insert(sensor.address) {
                return Err(CoreError::Conflict(format!(
                    "duplicate bus address {} (sensor {})",
                    sensor.address, sensor.id
                )));
            }
        }

        sensors.sort_by_key(|s| s.id);
        Ok(Self { sensors })
    }

    /// Registry with the factory sensor set.
    pub fn factory() -> Self {
        Self {
            sensors: (1..=DEFAULT_SENSOR_COUNT).map(SensorConfig::factory).collect(),
        }
    }

    pub fn get(&self, id: SensorId) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.id == id)
    }

    pub fn all(&self) -> &[SensorConfig] {
        &self.sensors
    }

    /// Enabled sensors in id order.
    pub fn enabled(&self) -> impl Iterator<Item = &SensorConfig> {
        self.sensors.iter().filter(|s| s.enabled)
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Replace the configuration of an existing sensor.
    ///
    /// The update is validated against the rest of the registry; on error the
    /// registry is left untouched.
    pub fn replace(&mut self, updated: SensorConfig) -> Result<(), CoreError> {
        let position = self
            .sensors
            .iter()
            .position(|s| s.id == updated.id)
            .ok_or(CoreError::SensorNotFound(updated.id))?;

        let mut candidate = self.sensors.clone();
        candidate[position] = updated;
        *self = Self::new(candidate)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
