//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the hand-off point between the acquisition loop and
//! everything that must not slow it down: notification delivery, status
//! reporting and logging. Shared via `Arc<EventBus>`.

use nh3_core::alert::AlertNotification;
use nh3_core::reading::Reading;
use nh3_core::types::{DbId, SensorId, Timestamp};
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// MonitorEvent
// ---------------------------------------------------------------------------

/// Something that happened in the monitor.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A sensor produced a reading (measured or offline marker).
    ReadingTaken { reading: Reading },

    /// The alert gate let a notification through.
    AlertRaised { alert: AlertNotification },

    /// A sensor reached the consecutive-failure limit.
    SensorDegraded {
        sensor_id: SensorId,
        consecutive_failures: u32,
        at: Timestamp,
    },

    /// A degraded sensor answered again.
    SensorOnline { sensor_id: SensorId, at: Timestamp },

    /// A reading batch could not be stored and was dropped.
    StorageDegraded { error: String, dropped: usize },

    /// Storage accepted a batch again after a failure.
    StorageRecovered,

    /// A notification could not be delivered on one channel.
    DeliveryFailed {
        alert_id: Option<DbId>,
        sensor_id: SensorId,
        channel: String,
        recipient: String,
        error: String,
    },
}

impl MonitorEvent {
    /// Dot-separated event name, used in logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            MonitorEvent::ReadingTaken { .. } => "reading.taken",
            MonitorEvent::AlertRaised { .. } => "alert.raised",
            MonitorEvent::SensorDegraded { .. } => "sensor.degraded",
            MonitorEvent::SensorOnline { .. } => "sensor.online",
            MonitorEvent::StorageDegraded { .. } => "storage.degraded",
            MonitorEvent::StorageRecovered => "storage.recovered",
            MonitorEvent::DeliveryFailed { .. } => "delivery.failed",
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use nh3_events::bus::{EventBus, MonitorEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(MonitorEvent::StorageRecovered);
/// ```
pub struct EventBus {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest messages are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Never blocks. With no subscribers the event is dropped.
    pub fn publish(&self, event: MonitorEvent) {
        // Err only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
