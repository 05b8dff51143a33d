//! Email notification delivery via SMTP.
//!
//! [`EmailDelivery`] wraps the `lettre` async SMTP transport to send
//! plain-text alert emails. [`EmailConfig::from_settings`] returns `None`
//! when the channel is disabled or incomplete, in which case no mailer
//! should be constructed.

use async_trait::async_trait;
use nh3_core::alert::AlertNotification;
use nh3_core::config::EmailSettings;

use super::{render_body, DeliveryError, NotificationChannel};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Email build error: {0}")]
    Build(String),
}

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Configuration for the SMTP email channel.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub recipients: Vec<String>,
    /// Prepended to every subject line, e.g. `[NH3 Alert]`.
    pub subject_prefix: String,
}

impl EmailConfig {
    /// Build from the `notifications.email` settings.
    ///
    /// Returns `None` if the channel is disabled, has no SMTP host or has
    /// no recipients.
    pub fn from_settings(settings: &EmailSettings) -> Option<Self> {
        if !settings.enabled || settings.smtp_host.is_empty() || settings.recipients.is_empty() {
            return None;
        }
        Some(Self {
            smtp_host: settings.smtp_host.clone(),
            smtp_port: settings.smtp_port,
            from_address: settings.from_address.clone(),
            smtp_user: settings.username.clone(),
            smtp_password: settings.password.clone(),
            recipients: settings.recipients.clone(),
            subject_prefix: settings.subject_prefix.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// EmailDelivery
// ---------------------------------------------------------------------------

/// Sends alert emails via SMTP.
pub struct EmailDelivery {
    config: EmailConfig,
}

impl EmailDelivery {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Subject line for a notification.
    pub fn subject(&self, notification: &AlertNotification) -> String {
        format!(
            "{} {} - {}",
            self.config.subject_prefix,
            notification.kind().as_str().to_uppercase(),
            notification.sensor_name
        )
    }

    /// Send a notification email to one address.
    pub async fn deliver(
        &self,
        to_email: &str,
        notification: &AlertNotification,
    ) -> Result<(), EmailError> {
        use lettre::{
            message::header::ContentType, transport::smtp::authentication::Credentials,
            AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
        };

        let email = Message::builder()
            .from(self.config.from_address.parse()?)
            .to(to_email.parse()?)
            .subject(self.subject(notification))
            .header(ContentType::TEXT_PLAIN)
            .body(render_body(notification))
            .map_err(|e| EmailError::Build(e.to_string()))?;

        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)?
                .port(self.config.smtp_port);

        if let (Some(user), Some(pass)) = (&self.config.smtp_user, &self.config.smtp_password) {
            transport_builder =
                transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let mailer = transport_builder.build();
        mailer.send(email).await?;

        tracing::info!(
            to = to_email,
            sensor_id = notification.sensor_id,
            kind = %notification.kind(),
            "Alert email sent"
        );
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for EmailDelivery {
    fn name(&self) -> &'static str {
        "email"
    }

    fn recipients(&self) -> &[String] {
        &self.config.recipients
    }

    async fn send(
        &self,
        recipient: &str,
        notification: &AlertNotification,
    ) -> Result<(), DeliveryError> {
        Ok(self.deliver(recipient, notification).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use nh3_core::severity::Severity;

    use super::*;

    fn settings() -> EmailSettings {
        EmailSettings {
            enabled: true,
            smtp_host: "smtp.example.com".to_string(),
            recipients: vec!["ops@example.com".to_string()],
            ..EmailSettings::default()
        }
    }

    #[test]
    fn from_settings_requires_enabled_host_and_recipients() {
        assert!(EmailConfig::from_settings(&settings()).is_some());

        let mut disabled = settings();
        disabled.enabled = false;
        assert!(EmailConfig::from_settings(&disabled).is_none());

        let mut no_host = settings();
        no_host.smtp_host.clear();
        assert!(EmailConfig::from_settings(&no_host).is_none());

        let mut nobody = settings();
        nobody.recipients.clear();
        assert!(EmailConfig::from_settings(&nobody).is_none());
    }

    #[test]
    fn subject_carries_prefix_kind_and_sensor() {
        let delivery = EmailDelivery::new(EmailConfig::from_settings(&settings()).unwrap());
        let n = AlertNotification {
            sensor_id: 2,
            sensor_name: "Sensor 2".to_string(),
            unit: "ppm".to_string(),
            severity: Severity::Alarm,
            value: 70.0,
            threshold: Some(50.0),
            timestamp: Utc::now(),
        };
        assert_eq!(delivery.subject(&n), "[NH3 Alert] ALARM - Sensor 2");
        assert_eq!(delivery.name(), "email");
        assert_eq!(delivery.recipients(), ["ops@example.com".to_string()]);
    }

    #[test]
    fn email_error_display_address() {
        let addr_err: Result<lettre::Address, _> = "not-an-email".parse();
        let err = EmailError::Address(addr_err.unwrap_err());
        assert!(err.to_string().contains("Email address parse error"));
    }
}
