//! The acquisition service: tick loop plus the operator handle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nh3_core::error::CoreError;
use nh3_core::sensor::{SensorConfig, SensorRegistry};
use nh3_core::types::{SensorId, Timestamp};
use nh3_events::{AlertSender, EventBus, MonitorEvent};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::acquisition::{AcquisitionCycle, LinkChange, TickReport};
use crate::status::{StatusBoard, StatusSnapshot};
use crate::store::StoreWriter;

/// Drives the acquisition cycle on a fixed interval.
pub struct Monitor {
    cycle: Arc<Mutex<AcquisitionCycle>>,
    registry: Arc<RwLock<SensorRegistry>>,
    bus: Arc<EventBus>,
    writer: StoreWriter,
    /// Delivery queue; alerts are only published on the bus without it.
    notifications: Option<AlertSender>,
    status: Arc<StatusBoard>,
    interval: Duration,
}

impl Monitor {
    pub fn new(
        cycle: AcquisitionCycle,
        registry: SensorRegistry,
        bus: Arc<EventBus>,
        writer: StoreWriter,
        interval: Duration,
    ) -> Self {
        let status = Arc::new(StatusBoard::new(&registry));
        Self {
            cycle: Arc::new(Mutex::new(cycle)),
            registry: Arc::new(RwLock::new(registry)),
            bus,
            writer,
            notifications: None,
            status,
            interval,
        }
    }

    /// Hand every raised alert to the notification dispatcher's queue.
    pub fn with_notifications(mut self, notifications: AlertSender) -> Self {
        self.notifications = Some(notifications);
        self
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            cycle: Arc::clone(&self.cycle),
            registry: Arc::clone(&self.registry),
            status: Arc::clone(&self.status),
        }
    }

    pub fn status_board(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.status)
    }

    /// Run one complete tick at `now`.
    ///
    /// Holds the cycle lock for the whole tick, so alert state and failure
    /// counters are never observed half-updated.
    pub async fn tick(&self, now: Timestamp) -> TickReport {
        let sensors: Vec<SensorConfig> = self.registry.read().await.enabled().cloned().collect();

        let report = {
            let mut cycle = self.cycle.lock().await;
            let report = cycle.run_tick(&sensors, now).await;
            self.status.apply_tick(&report, &cycle);
            report
        };

        self.publish(&report);
        self.writer.submit(report.readings.clone());

        tracing::debug!(
            sensors = report.readings.len(),
            offline = report.offline_count(),
            alerts = report.alerts.len(),
            "Tick complete"
        );
        report
    }

    fn publish(&self, report: &TickReport) {
        let at = report.at.unwrap_or_else(Utc::now);

        for change in &report.link_changes {
            let event = match *change {
                LinkChange::Degraded {
                    sensor_id,
                    consecutive_failures,
                } => MonitorEvent::SensorDegraded {
                    sensor_id,
                    consecutive_failures,
                    at,
                },
                LinkChange::Recovered { sensor_id } => MonitorEvent::SensorOnline { sensor_id, at },
            };
            self.bus.publish(event);
        }

        for alert in &report.alerts {
            tracing::info!(
                sensor_id = alert.sensor_id,
                kind = %alert.kind(),
                value = alert.value,
                "Alert raised"
            );
            if let Some(notifications) = &self.notifications {
                notifications.submit(alert.clone());
            }
            self.bus.publish(MonitorEvent::AlertRaised {
                alert: alert.clone(),
            });
        }

        for reading in &report.readings {
            self.bus.publish(MonitorEvent::ReadingTaken {
                reading: reading.clone(),
            });
        }
    }

    /// Tick every `interval` until `cancel` fires.
    ///
    /// Cancellation is only observed between ticks; a tick that has started
    /// always completes. Ticks that overrun the interval delay the next one
    /// instead of bunching up.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let sensors = self.registry.read().await.enabled().count();
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            sensors,
            "Acquisition started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                }
            }
        }

        tracing::info!("Acquisition stopped");
    }
}

// ---------------------------------------------------------------------------
// MonitorHandle
// ---------------------------------------------------------------------------

/// Cloneable operator interface to a running [`Monitor`].
#[derive(Clone)]
pub struct MonitorHandle {
    cycle: Arc<Mutex<AcquisitionCycle>>,
    registry: Arc<RwLock<SensorRegistry>>,
    status: Arc<StatusBoard>,
}

impl MonitorHandle {
    /// Clear a sensor's failure counters and alert state.
    ///
    /// Waits for an in-flight tick to finish.
    pub async fn reset_sensor(&self, sensor_id: SensorId) -> Result<(), CoreError> {
        let sensor = self
            .registry
            .read()
            .await
            .get(sensor_id)
            .cloned()
            .ok_or(CoreError::SensorNotFound(sensor_id))?;

        let mut cycle = self.cycle.lock().await;
        cycle.reset(sensor_id);
        self.status.refresh_sensor(&sensor, &cycle);

        tracing::info!(sensor_id, "Sensor state reset");
        Ok(())
    }

    /// Replace a sensor's configuration; applies from the next tick.
    pub async fn update_sensor(&self, sensor: SensorConfig) -> Result<(), CoreError> {
        self.registry.write().await.replace(sensor.clone())?;

        let cycle = self.cycle.lock().await;
        self.status.refresh_sensor(&sensor, &cycle);

        tracing::info!(sensor_id = sensor.id, "Sensor configuration updated");
        Ok(())
    }

    pub async fn sensors(&self) -> Vec<SensorConfig> {
        self.registry.read().await.all().to_vec()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }
}
