//! Periodic acquisition: read every enabled sensor once per tick.
//!
//! Reads are strictly sequential over the single transport. A failed read
//! produces an offline marker for that sensor and never aborts the rest of
//! the tick. After `retries` consecutive failures a sensor is flagged
//! degraded until it answers again or an operator resets it.

use std::collections::HashMap;
use std::time::Duration;

use nh3_core::alert::{AlertNotification, AlertRegistry};
use nh3_core::reading::Reading;
use nh3_core::sensor::SensorConfig;
use nh3_core::types::{SensorId, Timestamp};
use serde::Serialize;

use crate::error::MonitorError;
use crate::transport::{Transport, TransportError};

/// Connectivity of one sensor as seen by the acquisition loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    #[default]
    Online,
    /// The last read failed; fewer than `retries` failures in a row.
    Offline,
    /// At least `retries` consecutive failures.
    Degraded,
}

/// Failure bookkeeping for one sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorLink {
    pub consecutive_failures: u32,
    pub state: LinkState,
}

/// A sensor crossing into or out of the degraded state during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkChange {
    Degraded {
        sensor_id: SensorId,
        consecutive_failures: u32,
    },
    Recovered {
        sensor_id: SensorId,
    },
}

/// Everything one tick produced.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub at: Option<Timestamp>,
    /// One reading per enabled sensor, in id order.
    pub readings: Vec<Reading>,
    pub alerts: Vec<AlertNotification>,
    pub link_changes: Vec<LinkChange>,
}

impl TickReport {
    pub fn offline_count(&self) -> usize {
        self.readings.iter().filter(|r| r.is_offline()).count()
    }
}

// ---------------------------------------------------------------------------
// AcquisitionCycle
// ---------------------------------------------------------------------------

/// Owns the transport together with all mutable per-sensor state.
///
/// The whole cycle sits behind one async mutex in the service, so an
/// operator reset waits for the in-flight tick instead of interleaving
/// with it.
pub struct AcquisitionCycle {
    transport: Box<dyn Transport>,
    read_timeout: Duration,
    retries: u32,
    links: HashMap<SensorId, SensorLink>,
    alerts: AlertRegistry,
}

impl AcquisitionCycle {
    pub fn new(
        transport: Box<dyn Transport>,
        read_timeout: Duration,
        retries: u32,
        alerts: AlertRegistry,
    ) -> Self {
        Self {
            transport,
            read_timeout,
            retries: retries.max(1),
            links: HashMap::new(),
            alerts,
        }
    }

    /// Run one tick over `sensors`, skipping disabled ones.
    ///
    /// All readings of the tick carry the tick timestamp `now`.
    pub async fn run_tick(&mut self, sensors: &[SensorConfig], now: Timestamp) -> TickReport {
        let mut report = TickReport {
            at: Some(now),
            ..TickReport::default()
        };

        for sensor in sensors.iter().filter(|s| s.enabled) {
            let reading = match self.read_raw(sensor).await {
                Ok(raw) => {
                    if let Some(change) = self.record_success(sensor.id) {
                        report.link_changes.push(change);
                    }
                    Reading::measured(sensor, raw, now)
                }
                Err(e) => {
                    if let Some(change) = self.record_failure(sensor.id, &e) {
                        report.link_changes.push(change);
                    }
                    Reading::offline(sensor.id, now)
                }
            };

            if let Some(alert) = self.alerts.observe(sensor, &reading) {
                report.alerts.push(alert);
            }
            report.readings.push(reading);
        }

        report
    }

    async fn read_raw(&mut self, sensor: &SensorConfig) -> Result<f64, MonitorError> {
        let read = self.transport.read(sensor.address, sensor.register);
        let raw = match tokio::time::timeout(self.read_timeout, read).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.read_timeout)),
        }
        .map_err(|e| MonitorError::from_transport(sensor.id, e))?;

        if !raw.is_finite() {
            return Err(MonitorError::from_transport(
                sensor.id,
                TransportError::Protocol(format!("non-finite value {raw}")),
            ));
        }
        Ok(raw)
    }

    fn record_success(&mut self, sensor_id: SensorId) -> Option<LinkChange> {
        let link = self.links.entry(sensor_id).or_default();
        let was_degraded = link.state == LinkState::Degraded;
        *link = SensorLink::default();

        if was_degraded {
            tracing::info!(sensor_id, "Sensor answering again");
            Some(LinkChange::Recovered { sensor_id })
        } else {
            None
        }
    }

    fn record_failure(&mut self, sensor_id: SensorId, error: &MonitorError) -> Option<LinkChange> {
        let link = self.links.entry(sensor_id).or_default();
        link.consecutive_failures = link.consecutive_failures.saturating_add(1);
        let failures = link.consecutive_failures;

        if failures < self.retries {
            link.state = LinkState::Offline;
            tracing::warn!(sensor_id, failures, error = %error, "Sensor read failed");
            return None;
        }

        let newly_degraded = link.state != LinkState::Degraded;
        link.state = LinkState::Degraded;
        if newly_degraded {
            tracing::error!(
                sensor_id,
                failures,
                error = %error,
                "Sensor degraded after consecutive failures"
            );
            Some(LinkChange::Degraded {
                sensor_id,
                consecutive_failures: failures,
            })
        } else {
            tracing::debug!(sensor_id, failures, error = %error, "Degraded sensor still silent");
            None
        }
    }

    pub fn link(&self, sensor_id: SensorId) -> SensorLink {
        self.links.get(&sensor_id).copied().unwrap_or_default()
    }

    pub fn alerts(&self) -> &AlertRegistry {
        &self.alerts
    }

    /// Clear failure counters and alert state of one sensor.
    pub fn reset(&mut self, sensor_id: SensorId) {
        self.links.remove(&sensor_id);
        self.alerts.reset(sensor_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
