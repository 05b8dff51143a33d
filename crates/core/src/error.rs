use crate::types::SensorId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Sensor not found: {0}")]
    SensorNotFound(SensorId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}
