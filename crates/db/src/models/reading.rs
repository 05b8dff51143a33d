//! Sensor reading rows (append-only time series).

use nh3_core::error::CoreError;
use nh3_core::reading::{Reading, ReadingStatus};
use nh3_core::types::{DbId, SensorId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `sensor_readings` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SensorReading {
    pub id: DbId,
    pub sensor_id: SensorId,
    /// `None` for offline markers.
    pub value: Option<f64>,
    pub status: String,
    pub recorded_at: Timestamp,
}

impl SensorReading {
    /// Parse the stored status text.
    pub fn reading_status(&self) -> Result<ReadingStatus, CoreError> {
        self.status.parse()
    }

    /// Convert back into the domain type.
    pub fn into_reading(self) -> Result<Reading, CoreError> {
        let status = self.reading_status()?;
        Ok(Reading {
            sensor_id: self.sensor_id,
            value: self.value,
            status,
            recorded_at: self.recorded_at,
        })
    }
}
