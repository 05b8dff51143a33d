//! Alert rows: one per notification the alert gate let through.

use nh3_core::alert::AlertNotification;
use nh3_core::types::{DbId, SensorId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `alerts` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Alert {
    pub id: DbId,
    pub sensor_id: SensorId,
    /// `warning`, `alarm`, `recovery` or `offline`.
    pub alert_type: String,
    pub value: f64,
    pub threshold: Option<f64>,
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_at: Option<Timestamp>,
    /// Operator who acknowledged the alert, when known.
    pub acknowledged_by: Option<String>,
    pub created_at: Timestamp,
}

/// DTO for inserting a new alert.
#[derive(Debug, Clone)]
pub struct CreateAlert {
    pub sensor_id: SensorId,
    pub alert_type: String,
    pub value: f64,
    pub threshold: Option<f64>,
    pub message: String,
    pub created_at: Timestamp,
}

impl From<&AlertNotification> for CreateAlert {
    fn from(n: &AlertNotification) -> Self {
        Self {
            sensor_id: n.sensor_id,
            alert_type: n.kind().as_str().to_string(),
            value: n.value,
            threshold: n.threshold,
            message: n.summary(),
            created_at: n.timestamp,
        }
    }
}
