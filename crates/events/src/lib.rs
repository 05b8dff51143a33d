//! Event bus and alert notification delivery for the ammonia monitor.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`MonitorEvent`]: everything the acquisition loop reports.
//! - [`NotificationDispatcher`]: records alerts and delivers them on the
//!   configured channels, fed by its own [`alert_queue`].
//! - [`delivery`]: the email and WhatsApp channels.

pub mod bus;
pub mod delivery;
pub mod dispatcher;

pub use bus::{EventBus, MonitorEvent};
pub use delivery::email::{EmailConfig, EmailDelivery};
pub use delivery::whatsapp::{WhatsAppConfig, WhatsAppDelivery};
pub use delivery::{DeliveryError, NotificationChannel};
pub use dispatcher::{
    alert_queue, AlertSender, DispatchOutcome, NotificationDispatcher, ALERT_QUEUE_CAPACITY,
};
