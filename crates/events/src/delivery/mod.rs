//! External delivery channels for alert notifications.
//!
//! Each channel implements [`NotificationChannel`]; the
//! [`NotificationDispatcher`](crate::dispatcher::NotificationDispatcher)
//! fans every alert out to all configured channels and recipients.

use async_trait::async_trait;
use nh3_core::alert::AlertNotification;

pub mod email;
pub mod whatsapp;

use email::EmailError;
use whatsapp::WhatsAppError;

/// Error type shared by all delivery channels.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Email(#[from] EmailError),

    #[error(transparent)]
    WhatsApp(#[from] WhatsAppError),

    /// The channel refused the message without a transport-level cause.
    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

/// An outbound notification channel.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short channel name, stored with each delivery record.
    fn name(&self) -> &'static str;

    /// Recipients this channel delivers to.
    fn recipients(&self) -> &[String];

    /// Deliver one notification to one recipient.
    async fn send(
        &self,
        recipient: &str,
        notification: &AlertNotification,
    ) -> Result<(), DeliveryError>;
}

/// Multi-line message body shared by the text channels.
pub fn render_body(notification: &AlertNotification) -> String {
    format!(
        "{}\nSensor: {} (#{})\nTime: {}",
        notification.summary(),
        notification.sensor_name,
        notification.sensor_id,
        notification.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use nh3_core::severity::Severity;

    use super::*;

    #[test]
    fn body_contains_summary_and_time() {
        let n = AlertNotification {
            sensor_id: 4,
            sensor_name: "Evaporator".to_string(),
            unit: "ppm".to_string(),
            severity: Severity::Warning,
            value: 31.5,
            threshold: Some(25.0),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 2, 8, 30, 0).unwrap(),
        };
        let body = render_body(&n);
        assert!(body.starts_with("WARNING: Evaporator = 31.50 ppm (limit 25.00 ppm)"));
        assert!(body.contains("Sensor: Evaporator (#4)"));
        assert!(body.ends_with("Time: 2024-05-02 08:30:00 UTC"));
    }

    #[test]
    fn rejected_error_display() {
        let err = DeliveryError::Rejected("quota exceeded".to_string());
        assert_eq!(err.to_string(), "Delivery rejected: quota exceeded");
    }
}
