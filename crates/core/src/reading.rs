//! Sensor readings produced by the acquisition cycle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::sensor::SensorConfig;
use crate::severity::Severity;
use crate::types::{SensorId, Timestamp};

/// Outcome recorded for one sensor in one acquisition tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    Normal,
    Warning,
    Alarm,
    /// The transport did not deliver a value (timeout or protocol error).
    Offline,
}

impl ReadingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadingStatus::Normal => "normal",
            ReadingStatus::Warning => "warning",
            ReadingStatus::Alarm => "alarm",
            ReadingStatus::Offline => "offline",
        }
    }

    /// The severity carried by this status, `None` for offline markers.
    pub fn severity(self) -> Option<Severity> {
        match self {
            ReadingStatus::Normal => Some(Severity::Normal),
            ReadingStatus::Warning => Some(Severity::Warning),
            ReadingStatus::Alarm => Some(Severity::Alarm),
            ReadingStatus::Offline => None,
        }
    }
}

impl From<Severity> for ReadingStatus {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Normal => ReadingStatus::Normal,
            Severity::Warning => ReadingStatus::Warning,
            Severity::Alarm => ReadingStatus::Alarm,
        }
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(ReadingStatus::Normal),
            "warning" => Ok(ReadingStatus::Warning),
            "alarm" => Ok(ReadingStatus::Alarm),
            "offline" => Ok(ReadingStatus::Offline),
            other => Err(CoreError::Validation(format!(
                "unknown reading status '{other}'"
            ))),
        }
    }
}

/// One immutable sample for one sensor.
///
/// Constructed only through [`Reading::measured`] or [`Reading::offline`] so
/// that the status of a measured reading is always derived from its value
/// and the sensor thresholds in force at acquisition time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_id: SensorId,
    /// Engineering value; `None` for offline markers.
    pub value: Option<f64>,
    pub status: ReadingStatus,
    pub recorded_at: Timestamp,
}

impl Reading {
    /// Build a reading from a raw transport value.
    pub fn measured(sensor: &SensorConfig, raw: f64, recorded_at: Timestamp) -> Self {
        let value = sensor.to_engineering(raw);
        Self {
            sensor_id: sensor.id,
            value: Some(value),
            status: sensor.severity(value).into(),
            recorded_at,
        }
    }

    /// Marker for a sensor that could not be read this tick.
    pub fn offline(sensor_id: SensorId, recorded_at: Timestamp) -> Self {
        Self {
            sensor_id,
            value: None,
            status: ReadingStatus::Offline,
            recorded_at,
        }
    }

    pub fn severity(&self) -> Option<Severity> {
        self.status.severity()
    }

    pub fn is_offline(&self) -> bool {
        self.status == ReadingStatus::Offline
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn measured_reading_derives_status_from_thresholds() {
        let sensor = SensorConfig::factory(1);
        let now = Utc::now();

        let normal = Reading::measured(&sensor, 10.0, now);
        assert_eq!(normal.status, ReadingStatus::Normal);
        assert_eq!(normal.value, Some(10.0));

        let warning = Reading::measured(&sensor, 25.0, now);
        assert_eq!(warning.severity(), Some(Severity::Warning));

        let alarm = Reading::measured(&sensor, 250.0, now);
        assert_eq!(alarm.value, Some(100.0), "clamped to max_value");
        assert_eq!(alarm.status, ReadingStatus::Alarm);
    }

    #[test]
    fn offline_reading_has_no_value_or_severity() {
        let reading = Reading::offline(7, Utc::now());
        assert!(reading.is_offline());
        assert!(reading.value.is_none());
        assert!(reading.severity().is_none());
    }

    #[test]
    fn status_parses_from_database_text() {
        for status in [
            ReadingStatus::Normal,
            ReadingStatus::Warning,
            ReadingStatus::Alarm,
            ReadingStatus::Offline,
        ] {
            assert_eq!(status.as_str().parse::<ReadingStatus>().unwrap(), status);
        }
        assert!("error".parse::<ReadingStatus>().is_err());
    }
}
