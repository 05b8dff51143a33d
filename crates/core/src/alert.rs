//! Alert gating: decides when a classified reading becomes a notification.
//!
//! Pure logic, no I/O. The caller owns the [`AlertRegistry`] (typically
//! behind an `Arc<Mutex<_>>`) and passes the current time in, which keeps
//! cooldown behaviour deterministic under test.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::reading::Reading;
use crate::sensor::SensorConfig;
use crate::severity::Severity;
use crate::types::{SensorId, Timestamp};

/// Default minimum interval between notifications of the same severity.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(15 * 60);

// ---------------------------------------------------------------------------
// AlertNotification
// ---------------------------------------------------------------------------

/// What kind of notification an alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Warning,
    Alarm,
    /// The sensor returned to normal after an elevated notification.
    Recovery,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Warning => "warning",
            AlertKind::Alarm => "alarm",
            AlertKind::Recovery => "recovery",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Severity> for AlertKind {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Normal => AlertKind::Recovery,
            Severity::Warning => AlertKind::Warning,
            Severity::Alarm => AlertKind::Alarm,
        }
    }
}

/// A notification request produced by the gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertNotification {
    pub sensor_id: SensorId,
    pub sensor_name: String,
    pub unit: String,
    /// `Normal` for recovery notifications.
    pub severity: Severity,
    pub value: f64,
    /// Threshold that was crossed; `None` for recoveries.
    pub threshold: Option<f64>,
    pub timestamp: Timestamp,
}

impl AlertNotification {
    pub fn kind(&self) -> AlertKind {
        self.severity.into()
    }

    pub fn is_recovery(&self) -> bool {
        self.severity == Severity::Normal
    }

    /// One-line human readable summary used by every delivery channel.
    pub fn summary(&self) -> String {
        match self.threshold {
            Some(threshold) => format!(
                "{}: {} = {:.2} {} (limit {:.2} {})",
                self.kind().as_str().to_uppercase(),
                self.sensor_name,
                self.value,
                self.unit,
                threshold,
                self.unit
            ),
            None => format!(
                "RECOVERY: {} back to normal at {:.2} {}",
                self.sensor_name, self.value, self.unit
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// AlertState
// ---------------------------------------------------------------------------

/// Per-sensor gate state.
#[derive(Debug, Clone, Default)]
pub struct AlertState {
    current: Severity,
    last_notified_at: Option<Timestamp>,
    last_by_severity: [Option<Timestamp>; 3],
    recovery_pending: bool,
}

impl AlertState {
    /// Severity of the most recent measured reading.
    pub fn current(&self) -> Severity {
        self.current
    }

    /// When any notification was last dispatched for this sensor.
    pub fn last_notified_at(&self) -> Option<Timestamp> {
        self.last_notified_at
    }

    /// When a notification of `severity` was last dispatched.
    pub fn last_notified(&self, severity: Severity) -> Option<Timestamp> {
        self.last_by_severity[severity.index()]
    }

    /// Whether an elevated notification is still waiting for its recovery.
    pub fn recovery_pending(&self) -> bool {
        self.recovery_pending
    }

    fn record(&mut self, severity: Severity, now: Timestamp) {
        self.last_notified_at = Some(now);
        self.last_by_severity[severity.index()] = Some(now);
        self.recovery_pending = severity.is_elevated();
    }
}

// ---------------------------------------------------------------------------
// AlertGate
// ---------------------------------------------------------------------------

/// Cooldown policy shared by every sensor.
#[derive(Debug, Clone)]
pub struct AlertGate {
    cooldown: chrono::Duration,
}

impl AlertGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown: chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn cooldown(&self) -> chrono::Duration {
        self.cooldown
    }

    /// Advance `state` with a newly classified reading.
    ///
    /// Returns the severity to notify (`Normal` meaning recovery) or `None`
    /// when the reading is suppressed.
    ///
    /// Warning and alarm fire when the severity changed or the cooldown has
    /// passed since the last notification, and never twice for the same
    /// severity inside one cooldown window. A recovery fires once per
    /// elevated episode; if the cooldown blocks it, it is deferred to the
    /// next normal reading after the window.
    pub fn evaluate(
        &self,
        state: &mut AlertState,
        severity: Severity,
        now: Timestamp,
    ) -> Option<Severity> {
        let previous = state.current;
        state.current = severity;

        let same_severity_clear = self.elapsed(state.last_notified(severity), now);

        let fire = if severity.is_elevated() {
            same_severity_clear
                && (severity != previous || self.elapsed(state.last_notified_at, now))
        } else {
            state.recovery_pending && same_severity_clear
        };

        if !fire {
            return None;
        }
        state.record(severity, now);
        Some(severity)
    }

    fn elapsed(&self, since: Option<Timestamp>, now: Timestamp) -> bool {
        match since {
            Some(last) => now.signed_duration_since(last) >= self.cooldown,
            None => true,
        }
    }
}

impl Default for AlertGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

// ---------------------------------------------------------------------------
// AlertRegistry
// ---------------------------------------------------------------------------

/// Gate state for every sensor, indexed by sensor id.
#[derive(Debug, Default)]
pub struct AlertRegistry {
    gate: AlertGate,
    states: HashMap<SensorId, AlertState>,
}

impl AlertRegistry {
    pub fn new(gate: AlertGate) -> Self {
        Self {
            gate,
            states: HashMap::new(),
        }
    }

    /// Feed one reading through the gate for its sensor.
    ///
    /// Offline readings carry no severity and leave the state untouched.
    pub fn observe(
        &mut self,
        sensor: &SensorConfig,
        reading: &Reading,
    ) -> Option<AlertNotification> {
        let severity = reading.severity()?;
        let value = reading.value?;
        let state = self.states.entry(sensor.id).or_default();

        let notify = self.gate.evaluate(state, severity, reading.recorded_at)?;

        Some(AlertNotification {
            sensor_id: sensor.id,
            sensor_name: sensor.name.clone(),
            unit: sensor.unit.clone(),
            severity: notify,
            value,
            threshold: sensor.threshold_for(notify),
            timestamp: reading.recorded_at,
        })
    }

    pub fn state(&self, sensor_id: SensorId) -> Option<&AlertState> {
        self.states.get(&sensor_id)
    }

    /// Forget all gate state for a sensor (administrative reset).
    pub fn reset(&mut self, sensor_id: SensorId) {
        self.states.remove(&sensor_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
