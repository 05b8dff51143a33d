use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use nh3_core::alert::{AlertGate, AlertNotification, AlertRegistry};
use nh3_core::error::CoreError;
use nh3_core::sensor::{SensorConfig, SensorRegistry};
use nh3_core::severity::Severity;
use nh3_core::types::Timestamp;
use nh3_db::repositories::{AlertRepo, ReadingRepo, SensorRepo};
use nh3_db::DbPool;
use nh3_events::{
    alert_queue, DeliveryError, EventBus, MonitorEvent, NotificationChannel,
    NotificationDispatcher, ALERT_QUEUE_CAPACITY,
};
use nh3_monitor::store::{ReadingStore, SqliteReadingStore, StoreWriter};
use nh3_monitor::transport::{ScriptStep, ScriptedTransport, TransportError};
use nh3_monitor::{AcquisitionCycle, LinkState, Monitor};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const COOLDOWN: Duration = Duration::from_secs(15 * 60);

struct Fixture {
    pool: DbPool,
    bus: Arc<EventBus>,
    transport: ScriptedTransport,
    monitor: Monitor,
    writer_handle: JoinHandle<()>,
}

async fn fixture(sensor_count: i64, retries: u32) -> Fixture {
    let pool = nh3_db::create_pool("sqlite::memory:").await.unwrap();
    nh3_db::run_migrations(&pool).await.unwrap();

    let registry =
        SensorRegistry::new((1..=sensor_count).map(SensorConfig::factory).collect()).unwrap();
    SensorRepo::sync(&pool, registry.all()).await.unwrap();

    let bus = Arc::new(EventBus::default());
    let store: Arc<dyn ReadingStore> = Arc::new(SqliteReadingStore::new(pool.clone()));
    let (writer, writer_handle) = StoreWriter::spawn(store, Arc::clone(&bus));

    let transport = ScriptedTransport::new();
    let cycle = AcquisitionCycle::new(
        Box::new(transport.clone()),
        READ_TIMEOUT,
        retries,
        AlertRegistry::new(AlertGate::new(COOLDOWN)),
    );
    let monitor = Monitor::new(cycle, registry, Arc::clone(&bus), writer, Duration::from_millis(10));

    Fixture {
        pool,
        bus,
        transport,
        monitor,
        writer_handle,
    }
}

fn minute(m: i64) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap() + chrono::Duration::minutes(m)
}

/// Drop the monitor so the writer drains, then wait for it.
async fn flush(monitor: Monitor, writer_handle: JoinHandle<()>) {
    drop(monitor);
    tokio::time::timeout(Duration::from_secs(5), writer_handle)
        .await
        .expect("writer drains")
        .unwrap();
}

struct CollectingChannel {
    recipients: Vec<String>,
    sent: Arc<Mutex<Vec<AlertNotification>>>,
}

#[async_trait]
impl NotificationChannel for CollectingChannel {
    fn name(&self) -> &'static str {
        "collect"
    }

    fn recipients(&self) -> &[String] {
        &self.recipients
    }

    async fn send(&self, _recipient: &str, n: &AlertNotification) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(n.clone());
        Ok(())
    }
}

#[tokio::test]
async fn cooldown_scenario_end_to_end() {
    let Fixture {
        pool,
        bus,
        transport,
        monitor,
        writer_handle,
    } = fixture(1, 3).await;

    let sent = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = NotificationDispatcher::new(pool.clone(), Arc::clone(&bus), true).with_channel(
        CollectingChannel {
            recipients: vec!["ops".to_string()],
            sent: Arc::clone(&sent),
        },
    );
    let (alerts, receiver) = alert_queue(ALERT_QUEUE_CAPACITY);
    let monitor = monitor.with_notifications(alerts);
    let dispatcher_handle = tokio::spawn(dispatcher.run(receiver, CancellationToken::new()));

    let script = [(0, 30.0), (5, 30.0), (10, 30.0), (12, 60.0), (20, 10.0)];
    transport.push(1, script.iter().map(|&(_, v)| ScriptStep::Value(v)));

    let mut fired = Vec::new();
    for (m, _) in script {
        let report = monitor.tick(minute(m)).await;
        fired.extend(report.alerts.into_iter().map(|a| (m, a.severity)));
    }
    assert_eq!(
        fired,
        vec![
            (0, Severity::Warning),
            (12, Severity::Alarm),
            (20, Severity::Normal),
        ]
    );

    // Dropping the monitor closes both queues; each consumer drains and exits.
    flush(monitor, writer_handle).await;
    assert_eq!(ReadingRepo::count(&pool).await.unwrap(), 5);

    tokio::time::timeout(Duration::from_secs(5), dispatcher_handle)
        .await
        .expect("dispatcher drains")
        .unwrap();
    assert_eq!(sent.lock().unwrap().len(), 3);

    let kinds: Vec<_> = AlertRepo::list_recent(&pool, 10)
        .await
        .unwrap()
        .into_iter()
        .rev()
        .map(|a| a.alert_type)
        .collect();
    assert_eq!(kinds, vec!["warning", "alarm", "recovery"]);
    assert!(sent.lock().unwrap()[2].is_recovery());
}

#[tokio::test]
async fn timeout_on_one_sensor_keeps_the_rest_of_the_tick() {
    let Fixture {
        pool,
        transport,
        monitor,
        writer_handle,
        ..
    } = fixture(5, 3).await;

    for address in 1..=5 {
        transport.set_fallback(address, ScriptStep::Value(12.0));
    }
    transport.push(3, [ScriptStep::Hang]);

    let report = monitor.tick(minute(0)).await;
    assert_eq!(report.readings.len(), 5);
    assert_eq!(report.offline_count(), 1);

    let snapshot = monitor.handle().snapshot();
    assert_eq!(snapshot.sensor(3).unwrap().link, LinkState::Offline);
    assert_eq!(snapshot.sensor(4).unwrap().last_value, Some(12.0));

    flush(monitor, writer_handle).await;
    let latest = ReadingRepo::latest_per_sensor(&pool).await.unwrap();
    assert_eq!(latest.len(), 5);
    assert_eq!(latest[2].value, None);
    assert_eq!(latest[2].status, "offline");
}

#[tokio::test]
async fn degraded_sensor_is_published_and_reset_by_operator() {
    let Fixture {
        bus,
        transport,
        monitor,
        ..
    } = fixture(2, 2).await;
    let mut events = bus.subscribe();

    transport.set_fallback(1, ScriptStep::Value(5.0));
    transport.set_fallback(2, ScriptStep::Fail(TransportError::Protocol("exception 0x02".into())));

    monitor.tick(minute(0)).await;
    monitor.tick(minute(1)).await;

    let degraded = loop {
        match events.recv().await.unwrap() {
            event @ MonitorEvent::SensorDegraded { .. } => break event,
            _ => continue,
        }
    };
    assert_matches!(
        degraded,
        MonitorEvent::SensorDegraded {
            sensor_id: 2,
            consecutive_failures: 2,
            ..
        }
    );

    let handle = monitor.handle();
    let row = handle.snapshot().sensor(2).cloned().unwrap();
    assert_eq!(row.link, LinkState::Degraded);
    assert_eq!(row.consecutive_failures, 2);

    let mut status = handle.subscribe_status();
    handle.reset_sensor(2).await.unwrap();
    assert!(status.has_changed().unwrap());
    let row = status.borrow_and_update().sensor(2).cloned().unwrap();
    assert_eq!(row.link, LinkState::Online);
    assert_eq!(row.consecutive_failures, 0);

    assert_matches!(
        handle.reset_sensor(42).await,
        Err(CoreError::SensorNotFound(42))
    );
}

#[tokio::test]
async fn updated_thresholds_apply_from_next_tick() {
    let Fixture {
        transport, monitor, ..
    } = fixture(1, 3).await;
    transport.set_fallback(1, ScriptStep::Value(30.0));

    let first = monitor.tick(minute(0)).await;
    assert_eq!(first.alerts[0].severity, Severity::Warning);

    let handle = monitor.handle();
    let mut sensor = handle.sensors().await[0].clone();
    sensor.warning_threshold = 20.0;
    sensor.alarm_threshold = 28.0;
    handle.update_sensor(sensor).await.unwrap();

    let second = monitor.tick(minute(1)).await;
    assert_eq!(second.alerts[0].severity, Severity::Alarm);
    assert_eq!(second.alerts[0].threshold, Some(28.0));
    assert_eq!(
        handle.snapshot().sensor(1).and_then(|row| row.last_alert_at),
        Some(minute(1))
    );

    let mut invalid = handle.sensors().await[0].clone();
    invalid.alarm_threshold = 5.0;
    assert!(handle.update_sensor(invalid).await.is_err());
}

#[tokio::test]
async fn cancellation_lets_the_in_flight_tick_finish() {
    let Fixture {
        pool,
        transport,
        monitor,
        writer_handle,
        ..
    } = fixture(3, 3).await;

    transport.push(1, [ScriptStep::Value(1.0)]);
    transport.push(2, [ScriptStep::Slow(Duration::from_millis(80), 2.0)]);
    transport.push(3, [ScriptStep::Value(3.0)]);
    for address in 1..=3 {
        transport.set_fallback(address, ScriptStep::Hang);
    }

    let cancel = CancellationToken::new();
    let run = tokio::spawn(monitor.run(cancel.clone()));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !transport.calls().contains(&2) {
        assert!(tokio::time::Instant::now() < deadline, "first tick never started");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("monitor stops")
        .unwrap();

    // The run future owned the monitor; its writer is gone now.
    tokio::time::timeout(Duration::from_secs(5), writer_handle)
        .await
        .expect("writer drains")
        .unwrap();

    assert_eq!(&transport.calls()[..3], &[1, 2, 3]);
    let latest = ReadingRepo::latest_per_sensor(&pool).await.unwrap();
    let values: Vec<_> = latest.iter().map(|r| r.value).collect();
    assert_eq!(&values[..3], &[Some(1.0), Some(2.0), Some(3.0)]);
}
