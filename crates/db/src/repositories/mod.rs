//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&DbPool` as the first argument.

pub mod alert_repo;
pub mod notification_repo;
pub mod reading_repo;
pub mod sensor_repo;

pub use alert_repo::AlertRepo;
pub use notification_repo::NotificationRepo;
pub use reading_repo::ReadingRepo;
pub use sensor_repo::SensorRepo;
