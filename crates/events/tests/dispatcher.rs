use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Utc;
use nh3_core::alert::AlertNotification;
use nh3_core::reading::Reading;
use nh3_core::sensor::SensorConfig;
use nh3_core::severity::Severity;
use nh3_db::repositories::{AlertRepo, NotificationRepo, SensorRepo};
use nh3_db::DbPool;
use nh3_events::{
    alert_queue, DeliveryError, EventBus, MonitorEvent, NotificationChannel,
    NotificationDispatcher, ALERT_QUEUE_CAPACITY,
};
use tokio_util::sync::CancellationToken;

/// Channel that records what it was asked to send and fails for listed
/// recipients.
struct RecordingChannel {
    recipients: Vec<String>,
    failing: Vec<String>,
    sent: Arc<Mutex<Vec<(String, i64)>>>,
}

impl RecordingChannel {
    fn new(recipients: &[&str], failing: &[&str]) -> (Self, Arc<Mutex<Vec<(String, i64)>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let channel = Self {
            recipients: recipients.iter().map(|s| s.to_string()).collect(),
            failing: failing.iter().map(|s| s.to_string()).collect(),
            sent: Arc::clone(&sent),
        };
        (channel, sent)
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn recipients(&self) -> &[String] {
        &self.recipients
    }

    async fn send(
        &self,
        recipient: &str,
        notification: &AlertNotification,
    ) -> Result<(), DeliveryError> {
        if self.failing.iter().any(|f| f == recipient) {
            return Err(DeliveryError::Rejected("mailbox unavailable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), notification.sensor_id));
        Ok(())
    }
}

async fn setup() -> DbPool {
    let pool = nh3_db::create_pool("sqlite::memory:").await.unwrap();
    nh3_db::run_migrations(&pool).await.unwrap();
    SensorRepo::sync(&pool, &[SensorConfig::factory(1)]).await.unwrap();
    pool
}

fn alarm() -> AlertNotification {
    AlertNotification {
        sensor_id: 1,
        sensor_name: "Sensor 1".to_string(),
        unit: "ppm".to_string(),
        severity: Severity::Alarm,
        value: 60.0,
        threshold: Some(50.0),
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn dispatch_records_alert_and_each_delivery() {
    let pool = setup().await;
    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();

    let (channel, sent) = RecordingChannel::new(&["ops", "shift"], &["shift"]);
    let dispatcher =
        NotificationDispatcher::new(pool.clone(), Arc::clone(&bus), true).with_channel(channel);

    let outcome = dispatcher.dispatch(&alarm()).await;
    assert_eq!(outcome.delivered, 1);
    assert_eq!(outcome.failed, 1);
    let alert_id = outcome.alert_id.expect("alert row written");

    assert_eq!(sent.lock().unwrap().as_slice(), &[("ops".to_string(), 1)]);

    let rows = NotificationRepo::list_for_alert(&pool, alert_id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].delivered);
    assert!(!rows[1].delivered);
    assert_eq!(rows[1].error.as_deref(), Some("Delivery rejected: mailbox unavailable"));

    assert_matches!(
        events.recv().await.unwrap(),
        MonitorEvent::DeliveryFailed { recipient, channel, .. }
            if recipient == "shift" && channel == "recording"
    );
}

#[tokio::test]
async fn disabled_dispatcher_records_but_does_not_send() {
    let pool = setup().await;
    let bus = Arc::new(EventBus::default());

    let (channel, sent) = RecordingChannel::new(&["ops"], &[]);
    let dispatcher =
        NotificationDispatcher::new(pool.clone(), Arc::clone(&bus), false).with_channel(channel);

    let outcome = dispatcher.dispatch(&alarm()).await;
    assert!(outcome.alert_id.is_some());
    assert_eq!(outcome.delivered, 0);
    assert!(sent.lock().unwrap().is_empty());
    assert_eq!(AlertRepo::unacknowledged_count(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn run_delivers_queued_alerts_until_cancelled() {
    let pool = setup().await;
    let bus = Arc::new(EventBus::default());
    let cancel = CancellationToken::new();

    let (channel, sent) = RecordingChannel::new(&["ops"], &[]);
    let dispatcher =
        NotificationDispatcher::new(pool.clone(), Arc::clone(&bus), true).with_channel(channel);
    let (alerts, receiver) = alert_queue(ALERT_QUEUE_CAPACITY);
    let handle = tokio::spawn(dispatcher.run(receiver, cancel.clone()));

    assert!(alerts.submit(alarm()));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while sent.lock().unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "alert never delivered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("dispatcher stops on cancel")
        .unwrap();

    assert_eq!(AlertRepo::list_recent(&pool, 10).await.unwrap().len(), 1);
    assert!(!alerts.submit(alarm()), "queue closed after shutdown");
}

/// Channel that takes a while per message and remembers severities.
struct SlowChannel {
    recipients: Vec<String>,
    delay: Duration,
    sent: Arc<Mutex<Vec<Severity>>>,
}

#[async_trait]
impl NotificationChannel for SlowChannel {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn recipients(&self) -> &[String] {
        &self.recipients
    }

    async fn send(
        &self,
        _recipient: &str,
        notification: &AlertNotification,
    ) -> Result<(), DeliveryError> {
        tokio::time::sleep(self.delay).await;
        self.sent.lock().unwrap().push(notification.severity);
        Ok(())
    }
}

#[tokio::test]
async fn slow_channel_still_gets_every_alert_despite_reading_flood() {
    let pool = setup().await;
    let bus = Arc::new(EventBus::default());
    let cancel = CancellationToken::new();

    let sent = Arc::new(Mutex::new(Vec::new()));
    let channel = SlowChannel {
        recipients: vec!["ops".to_string()],
        delay: Duration::from_millis(100),
        sent: Arc::clone(&sent),
    };
    let dispatcher =
        NotificationDispatcher::new(pool.clone(), Arc::clone(&bus), true).with_channel(channel);
    let (alerts, receiver) = alert_queue(ALERT_QUEUE_CAPACITY);
    let handle = tokio::spawn(dispatcher.run(receiver, cancel.clone()));

    let recovery = AlertNotification {
        severity: Severity::Normal,
        value: 10.0,
        threshold: None,
        ..alarm()
    };
    assert!(alerts.submit(alarm()));
    assert!(alerts.submit(recovery));

    let sensor = SensorConfig::factory(1);
    for _ in 0..1030 {
        bus.publish(MonitorEvent::ReadingTaken {
            reading: Reading::measured(&sensor, 10.0, Utc::now()),
        });
    }

    // Dropping the last sender lets the dispatcher drain and exit.
    drop(alerts);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("dispatcher drains its queue")
        .unwrap();

    assert_eq!(
        sent.lock().unwrap().as_slice(),
        &[Severity::Alarm, Severity::Normal]
    );
    assert_eq!(AlertRepo::list_recent(&pool, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn cancel_still_delivers_alerts_already_queued() {
    let pool = setup().await;
    let bus = Arc::new(EventBus::default());
    let cancel = CancellationToken::new();

    let sent = Arc::new(Mutex::new(Vec::new()));
    let channel = SlowChannel {
        recipients: vec!["ops".to_string()],
        delay: Duration::from_millis(20),
        sent: Arc::clone(&sent),
    };
    let dispatcher =
        NotificationDispatcher::new(pool.clone(), Arc::clone(&bus), true).with_channel(channel);
    let (alerts, receiver) = alert_queue(ALERT_QUEUE_CAPACITY);

    assert!(alerts.submit(alarm()));
    assert!(alerts.submit(alarm()));
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(5), dispatcher.run(receiver, cancel))
        .await
        .expect("dispatcher stops after draining");

    assert_eq!(sent.lock().unwrap().len(), 2);
    assert!(!alerts.submit(alarm()));
}

#[tokio::test]
async fn from_settings_skips_unconfigured_channels() {
    let pool = setup().await;
    let bus = Arc::new(EventBus::default());

    let dispatcher =
        NotificationDispatcher::from_settings(pool, bus, true, &Default::default());
    assert!(dispatcher.channel_names().is_empty());
}
