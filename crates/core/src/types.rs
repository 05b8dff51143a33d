/// Sensor identifiers match the `sensors.id` primary key.
pub type SensorId = i64;

/// Surrogate keys of stored rows (readings, alerts, notifications).
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
