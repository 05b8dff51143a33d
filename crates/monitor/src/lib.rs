//! Ammonia sensor monitor: acquisition, storage and status.
//!
//! The [`service::Monitor`] reads every sensor once per tick over a single
//! [`transport::Transport`], feeds the readings through the alert gate,
//! hands them to the storage writer and publishes everything on the event
//! bus. Notification delivery runs separately in `nh3-events`.

pub mod acquisition;
pub mod error;
pub mod retention;
pub mod service;
pub mod status;
pub mod store;
pub mod transport;

pub use acquisition::{AcquisitionCycle, LinkState, TickReport};
pub use error::MonitorError;
pub use service::{Monitor, MonitorHandle};
pub use status::{StatusBoard, StatusSnapshot};
pub use store::{ReadingStore, SqliteReadingStore, StoreWriter};
pub use transport::{ScriptedTransport, SimulatedTransport, Transport};
