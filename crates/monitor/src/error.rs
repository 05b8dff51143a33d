//! Error taxonomy of the running monitor.
//!
//! Everything but startup configuration failures is recovered locally: a failed
//! read marks one sensor offline for one tick, a failed write drops one
//! batch, a failed delivery raises a dashboard warning.

use nh3_core::config::ConfigError;
use nh3_core::types::SensorId;

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Sensor {sensor_id} did not answer: {source}")]
    TransportTimeout {
        sensor_id: SensorId,
        source: TransportError,
    },

    #[error("Sensor {sensor_id} returned an invalid response: {source}")]
    TransportProtocolError {
        sensor_id: SensorId,
        source: TransportError,
    },

    #[error("Storage write failed: {0}")]
    StorageWriteFailure(#[source] sqlx::Error),

    #[error("Storage prune failed: {0}")]
    StoragePruneFailure(#[source] sqlx::Error),

    #[error("Notification delivery failed on {channel}: {message}")]
    NotificationDeliveryFailure { channel: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The configured database could not be opened at startup.
    #[error("Database unavailable: {0}")]
    DatabaseUnavailable(#[source] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl MonitorError {
    /// Classify a failed read of `sensor_id`.
    ///
    /// Port-level I/O errors count as timeouts: the sensor did not answer.
    pub fn from_transport(sensor_id: SensorId, source: TransportError) -> Self {
        match source {
            TransportError::Protocol(_) => Self::TransportProtocolError { sensor_id, source },
            TransportError::Timeout(_) | TransportError::Io(_) => {
                Self::TransportTimeout { sensor_id, source }
            }
        }
    }

    /// Whether the process must stop.
    ///
    /// Only startup failures are fatal: a bad configuration, or a database
    /// location from that configuration that cannot be opened or migrated.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MonitorError::Config(_) | MonitorError::DatabaseUnavailable(_) | MonitorError::Migration(_)
        )
    }
}
