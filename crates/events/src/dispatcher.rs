//! Alert notification dispatcher.
//!
//! The acquisition loop hands alerts to an [`AlertSender`]. They travel on
//! a dedicated bounded queue rather than the [`EventBus`], so a burst of
//! reading events can never push an alert out before it is delivered.
//!
//! [`NotificationDispatcher`] drains that queue off the acquisition path: it
//! records the alert, fans it out to each configured channel and recipient,
//! and records the outcome of every delivery. Failures are logged and
//! published as [`MonitorEvent::DeliveryFailed`]; they never propagate
//! further.

use std::sync::Arc;

use chrono::Utc;
use nh3_core::alert::AlertNotification;
use nh3_core::config::NotificationSettings;
use nh3_core::types::DbId;
use nh3_db::models::alert::CreateAlert;
use nh3_db::models::notification::CreateNotification;
use nh3_db::repositories::{AlertRepo, NotificationRepo};
use nh3_db::DbPool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, MonitorEvent};
use crate::delivery::email::{EmailConfig, EmailDelivery};
use crate::delivery::whatsapp::{WhatsAppConfig, WhatsAppDelivery};
use crate::delivery::NotificationChannel;

/// Alerts that may wait for delivery before new ones are dropped.
pub const ALERT_QUEUE_CAPACITY: usize = 256;

/// Create the queue between the acquisition loop and the dispatcher.
pub fn alert_queue(capacity: usize) -> (AlertSender, mpsc::Receiver<AlertNotification>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (AlertSender { sender }, receiver)
}

/// Producer side of the alert queue. Never waits.
#[derive(Clone)]
pub struct AlertSender {
    sender: mpsc::Sender<AlertNotification>,
}

impl AlertSender {
    /// Queue an alert for delivery. Returns `false` if it was dropped.
    pub fn submit(&self, alert: AlertNotification) -> bool {
        match self.sender.try_send(alert) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(alert)) => {
                tracing::error!(
                    sensor_id = alert.sensor_id,
                    kind = %alert.kind(),
                    "Alert queue full, notification dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(alert)) => {
                tracing::error!(
                    sensor_id = alert.sensor_id,
                    kind = %alert.kind(),
                    "Notification dispatcher stopped, notification dropped"
                );
                false
            }
        }
    }
}

/// Result of dispatching one alert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Id of the stored alert row, if it could be written.
    pub alert_id: Option<DbId>,
    pub delivered: usize,
    pub failed: usize,
}

pub struct NotificationDispatcher {
    pool: DbPool,
    bus: Arc<EventBus>,
    channels: Vec<Box<dyn NotificationChannel>>,
    /// Master switch; alerts are still recorded when off.
    enabled: bool,
}

impl NotificationDispatcher {
    /// Create a dispatcher with no channels.
    pub fn new(pool: DbPool, bus: Arc<EventBus>, enabled: bool) -> Self {
        Self {
            pool,
            bus,
            channels: Vec::new(),
            enabled,
        }
    }

    /// Create a dispatcher with every channel the settings fully configure.
    pub fn from_settings(
        pool: DbPool,
        bus: Arc<EventBus>,
        enabled: bool,
        settings: &NotificationSettings,
    ) -> Self {
        let mut dispatcher = Self::new(pool, bus, enabled);

        if let Some(config) = EmailConfig::from_settings(&settings.email) {
            dispatcher = dispatcher.with_channel(EmailDelivery::new(config));
        }

        if let Some(config) = WhatsAppConfig::from_settings(&settings.whatsapp) {
            match WhatsAppDelivery::new(config) {
                Ok(delivery) => dispatcher = dispatcher.with_channel(delivery),
                Err(e) => tracing::warn!(error = %e, "WhatsApp channel unavailable"),
            }
        }

        dispatcher
    }

    pub fn with_channel(mut self, channel: impl NotificationChannel + 'static) -> Self {
        self.channels.push(Box::new(channel));
        self
    }

    /// Names of the configured channels.
    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Deliver queued alerts until every [`AlertSender`] is dropped or
    /// `cancel` fires.
    ///
    /// On cancel the queue is closed and the alerts already in it are still
    /// delivered before returning.
    pub async fn run(
        self,
        mut receiver: mpsc::Receiver<AlertNotification>,
        cancel: CancellationToken,
    ) {
        tracing::info!(
            channels = ?self.channel_names(),
            enabled = self.enabled,
            "Notification dispatcher started"
        );

        let mut draining = false;
        loop {
            let alert = tokio::select! {
                biased;
                _ = cancel.cancelled(), if !draining => {
                    tracing::info!("Notification dispatcher stopping, draining queue");
                    draining = true;
                    receiver.close();
                    continue;
                }
                alert = receiver.recv() => alert,
            };

            match alert {
                Some(alert) => {
                    self.dispatch(&alert).await;
                }
                None => break,
            }
        }

        tracing::info!("Notification dispatcher stopped");
    }

    /// Record and deliver one alert on every channel.
    pub async fn dispatch(&self, alert: &AlertNotification) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        match AlertRepo::insert(&self.pool, &CreateAlert::from(alert)).await {
            Ok(row) => outcome.alert_id = Some(row.id),
            Err(e) => tracing::error!(
                sensor_id = alert.sensor_id,
                error = %e,
                "Failed to record alert"
            ),
        }

        if !self.enabled {
            tracing::debug!(sensor_id = alert.sensor_id, "Notifications disabled, alert recorded only");
            return outcome;
        }

        for channel in &self.channels {
            for recipient in channel.recipients() {
                let result = channel.send(recipient, alert).await;
                let error = match &result {
                    Ok(()) => {
                        outcome.delivered += 1;
                        None
                    }
                    Err(e) => {
                        outcome.failed += 1;
                        tracing::warn!(
                            channel = channel.name(),
                            recipient = %recipient,
                            sensor_id = alert.sensor_id,
                            error = %e,
                            "Notification delivery failed"
                        );
                        self.bus.publish(MonitorEvent::DeliveryFailed {
                            alert_id: outcome.alert_id,
                            sensor_id: alert.sensor_id,
                            channel: channel.name().to_string(),
                            recipient: recipient.clone(),
                            error: e.to_string(),
                        });
                        Some(e.to_string())
                    }
                };

                if let Some(alert_id) = outcome.alert_id {
                    self.record(alert_id, channel.name(), recipient, error).await;
                }
            }
        }

        outcome
    }

    async fn record(&self, alert_id: DbId, channel: &str, recipient: &str, error: Option<String>) {
        let row = CreateNotification {
            alert_id,
            channel: channel.to_string(),
            recipient: recipient.to_string(),
            delivered: error.is_none(),
            error,
            created_at: Utc::now(),
        };
        if let Err(e) = NotificationRepo::insert(&self.pool, &row).await {
            tracing::error!(alert_id, channel, error = %e, "Failed to record notification");
        }
    }
}
