//! WhatsApp delivery through the Twilio Messages API, with retry.
//!
//! Failed attempts are retried twice with backoff (1 s, 2 s). Client
//! errors other than rate limiting are not retried since repeating the
//! same request cannot succeed.

use std::time::Duration;

use async_trait::async_trait;
use nh3_core::alert::AlertNotification;
use nh3_core::config::WhatsAppSettings;
use serde::Deserialize;

use super::{render_body, DeliveryError, NotificationChannel};

/// Retry delays in seconds.
const RETRY_DELAYS_SECS: [u64; 2] = [1, 2];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

const WHATSAPP_PREFIX: &str = "whatsapp:";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Twilio answered with a non-2xx status.
    #[error("Twilio returned HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },
}

impl WhatsAppError {
    fn is_retryable(&self) -> bool {
        match self {
            WhatsAppError::Request(_) => true,
            WhatsAppError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Error body returned by the Twilio REST API.
#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    message: String,
}

// ---------------------------------------------------------------------------
// WhatsAppConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender in `whatsapp:+E164` form.
    pub from_number: String,
    pub recipients: Vec<String>,
}

impl WhatsAppConfig {
    /// Build from the `notifications.whatsapp` settings.
    ///
    /// Returns `None` if the channel is disabled or any credential, the
    /// sender or the recipient list is missing.
    pub fn from_settings(settings: &WhatsAppSettings) -> Option<Self> {
        if !settings.enabled
            || settings.account_sid.is_empty()
            || settings.auth_token.is_empty()
            || settings.from_number.is_empty()
            || settings.recipients.is_empty()
        {
            return None;
        }
        Some(Self {
            account_sid: settings.account_sid.clone(),
            auth_token: settings.auth_token.clone(),
            from_number: whatsapp_address(&settings.from_number),
            recipients: settings.recipients.clone(),
        })
    }
}

/// Add the `whatsapp:` scheme to a bare phone number.
pub fn whatsapp_address(number: &str) -> String {
    let number = number.trim();
    if number.starts_with(WHATSAPP_PREFIX) {
        number.to_string()
    } else {
        format!("{WHATSAPP_PREFIX}{number}")
    }
}

// ---------------------------------------------------------------------------
// WhatsAppDelivery
// ---------------------------------------------------------------------------

pub struct WhatsAppDelivery {
    client: reqwest::Client,
    config: WhatsAppConfig,
    api_base: String,
}

impl WhatsAppDelivery {
    pub fn new(config: WhatsAppConfig) -> Result<Self, WhatsAppError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            config,
            api_base: TWILIO_API_BASE.to_string(),
        })
    }

    /// Point the client at a different API root.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }

    /// Deliver a notification to one number, retrying transient failures.
    pub async fn deliver(
        &self,
        to_number: &str,
        notification: &AlertNotification,
    ) -> Result<(), WhatsAppError> {
        let to = whatsapp_address(to_number);
        let body = render_body(notification);

        for (attempt, delay_secs) in RETRY_DELAYS_SECS.iter().enumerate() {
            match self.try_send(&to, &body).await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => {
                    tracing::error!(to = %to, error = %e, "WhatsApp delivery rejected");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        to = %to,
                        error = %e,
                        "WhatsApp delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
                }
            }
        }

        // Final attempt after the last backoff.
        match self.try_send(&to, &body).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(to = %to, error = %e, "WhatsApp delivery failed after all retries");
                Err(e)
            }
        }
    }

    /// Execute a single POST and check the response status.
    async fn try_send(&self, to: &str, body: &str) -> Result<(), WhatsAppError> {
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("From", self.config.from_number.as_str()),
                ("To", to),
                ("Body", body),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(to, "WhatsApp message sent");
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<TwilioErrorBody>(&text)
            .map(|b| b.message)
            .unwrap_or(text);
        Err(WhatsAppError::HttpStatus {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl NotificationChannel for WhatsAppDelivery {
    fn name(&self) -> &'static str {
        "whatsapp"
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
    use super::*;

    fn settings() -> WhatsAppSettings {
        WhatsAppSettings {
            enabled: true,
            account_sid: "AC0123".to_string(),
            auth_token: "secret".to_string(),
            from_number: "+14155238886".to_string(),
            recipients: vec!["+5511999999999".to_string()],
        }
    }

    #[test]
    fn numbers_get_whatsapp_scheme_once() {
        assert_eq!(whatsapp_address("+5511999999999"), "whatsapp:+5511999999999");
        assert_eq!(
            whatsapp_address(" whatsapp:+5511999999999"),
            "whatsapp:+5511999999999"
        );
    }

    #[test]
    fn from_settings_normalizes_sender() {
        let config = WhatsAppConfig::from_settings(&settings()).unwrap();
        assert_eq!(config.from_number, "whatsapp:+14155238886");
    }

    #[test]
    fn from_settings_requires_credentials() {
        let mut missing_token = settings();
        missing_token.auth_token.clear();
        assert!(WhatsAppConfig::from_settings(&missing_token).is_none());

        let mut disabled = settings();
        disabled.enabled = false;
        assert!(WhatsAppConfig::from_settings(&disabled).is_none());
    }

    #[test]
    fn messages_url_targets_account() {
        let delivery = WhatsAppDelivery::new(WhatsAppConfig::from_settings(&settings()).unwrap())
            .unwrap()
            .with_api_base("http://localhost:8080/");
        assert_eq!(
            delivery.messages_url(),
            "http://localhost:8080/Accounts/AC0123/Messages.json"
        );
    }

    #[test]
    fn only_transient_statuses_are_retried() {
        let status = |status| WhatsAppError::HttpStatus {
            status,
            message: String::new(),
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(!status(400).is_retryable());
    }

    #[test]
    fn http_status_error_display() {
        let err = WhatsAppError::HttpStatus {
            status: 401,
            message: "Authenticate".to_string(),
        };
        assert_eq!(err.to_string(), "Twilio returned HTTP 401: Authenticate");
    }
}
