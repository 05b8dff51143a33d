//! Live status surface for dashboards.
//!
//! [`StatusBoard`] keeps the latest [`StatusSnapshot`] in a
//! `tokio::sync::watch` channel. The tick loop updates sensor rows
//! directly; storage and delivery problems arrive through the event bus.

use chrono::Utc;
use nh3_core::reading::ReadingStatus;
use nh3_core::sensor::{SensorConfig, SensorRegistry};
use nh3_core::types::{SensorId, Timestamp};
use nh3_events::MonitorEvent;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::acquisition::{AcquisitionCycle, LinkState, TickReport};
use crate::error::MonitorError;

/// Dashboard row for one sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorStatus {
    pub sensor_id: SensorId,
    pub name: String,
    pub unit: String,
    pub enabled: bool,
    pub last_value: Option<f64>,
    /// `None` until the first reading.
    pub status: Option<ReadingStatus>,
    pub link: LinkState,
    pub consecutive_failures: u32,
    pub last_reading_at: Option<Timestamp>,
    /// When the alert gate last let a notification through.
    pub last_alert_at: Option<Timestamp>,
}

impl SensorStatus {
    fn new(sensor: &SensorConfig) -> Self {
        Self {
            sensor_id: sensor.id,
            name: sensor.name.clone(),
            unit: sensor.unit.clone(),
            enabled: sensor.enabled,
            last_value: None,
            status: None,
            link: LinkState::Online,
            consecutive_failures: 0,
            last_reading_at: None,
            last_alert_at: None,
        }
    }

    fn sync_with(&mut self, cycle: &AcquisitionCycle) {
        let link = cycle.link(self.sensor_id);
        self.link = link.state;
        self.consecutive_failures = link.consecutive_failures;
        self.last_alert_at = cycle
            .alerts()
            .state(self.sensor_id)
            .and_then(|state| state.last_notified_at());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub sensors: Vec<SensorStatus>,
    pub storage_degraded: bool,
    /// Last delivery failure, shown as a warning banner.
    pub delivery_warning: Option<String>,
    pub updated_at: Option<Timestamp>,
}

impl StatusSnapshot {
    pub fn sensor(&self, sensor_id: SensorId) -> Option<&SensorStatus> {
        self.sensors.iter().find(|s| s.sensor_id == sensor_id)
    }
}

pub struct StatusBoard {
    sender: watch::Sender<StatusSnapshot>,
}

impl StatusBoard {
    pub fn new(registry: &SensorRegistry) -> Self {
        let snapshot = StatusSnapshot {
            sensors: registry.all().iter().map(SensorStatus::new).collect(),
            ..StatusSnapshot::default()
        };
        let (sender, _) = watch::channel(snapshot);
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.sender.subscribe()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.sender.borrow().clone()
    }

    /// Fold one tick into the sensor rows.
    pub fn apply_tick(&self, report: &TickReport, cycle: &AcquisitionCycle) {
        self.sender.send_modify(|snapshot| {
            for reading in &report.readings {
                let Some(row) = snapshot
                    .sensors
                    .iter_mut()
                    .find(|s| s.sensor_id == reading.sensor_id)
                else {
                    continue;
                };
                if reading.value.is_some() {
                    row.last_value = reading.value;
                }
                row.status = Some(reading.status);
                row.last_reading_at = Some(reading.recorded_at);
                row.sync_with(cycle);
            }
            snapshot.updated_at = report.at.or_else(|| Some(Utc::now()));
        });
    }

    /// Refresh one sensor after an operator action.
    pub fn refresh_sensor(&self, sensor: &SensorConfig, cycle: &AcquisitionCycle) {
        self.sender.send_modify(|snapshot| {
            match snapshot.sensors.iter_mut().find(|s| s.sensor_id == sensor.id) {
                Some(row) => {
                    row.name = sensor.name.clone();
                    row.unit = sensor.unit.clone();
                    row.enabled = sensor.enabled;
                    row.sync_with(cycle);
                }
                None => {
                    let mut row = SensorStatus::new(sensor);
                    row.sync_with(cycle);
                    snapshot.sensors.push(row);
                    snapshot.sensors.sort_by_key(|s| s.sensor_id);
                }
            }
        });
    }

    pub fn set_storage_degraded(&self, degraded: bool) {
        self.sender.send_if_modified(|snapshot| {
            let changed = snapshot.storage_degraded != degraded;
            snapshot.storage_degraded = degraded;
            changed
        });
    }

    pub fn set_delivery_warning(&self, warning: Option<String>) {
        self.sender.send_modify(|snapshot| snapshot.delivery_warning = warning);
    }

    /// Apply one bus event. Returns `true` if it touched the board.
    pub fn apply_event(&self, event: &MonitorEvent) -> bool {
        match event {
            MonitorEvent::StorageDegraded { .. } => self.set_storage_degraded(true),
            MonitorEvent::StorageRecovered => self.set_storage_degraded(false),
            MonitorEvent::DeliveryFailed { channel, error, .. } => {
                let warning = MonitorError::NotificationDeliveryFailure {
                    channel: channel.clone(),
                    message: error.clone(),
                };
                self.set_delivery_warning(Some(warning.to_string()));
            }
            _ => return false,
        }
        true
    }

    /// Follow the event bus until it closes or `cancel` fires.
    pub async fn run(
        &self,
        mut receiver: broadcast::Receiver<MonitorEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = receiver.recv() => event,
            };
            match event {
                Ok(event) => {
                    self.apply_event(&event);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Status board lagged behind event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
