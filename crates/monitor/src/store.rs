//! Reading persistence off the acquisition path.
//!
//! The tick loop hands each batch to a [`StoreWriter`], which queues it for
//! a single writer task. The writer tries a batch up to three times and
//! then drops it with a log line; acquisition never waits on the database.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nh3_core::reading::Reading;
use nh3_core::types::Timestamp;
use nh3_db::repositories::{AlertRepo, ReadingRepo};
use nh3_db::DbPool;
use nh3_events::{EventBus, MonitorEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::MonitorError;

/// Backoff between write attempts; one more attempt than delays.
pub const WRITE_RETRY_DELAYS: [Duration; 2] =
    [Duration::from_millis(100), Duration::from_millis(500)];

/// Batches that may wait for the writer before new ones are dropped.
pub const WRITE_QUEUE_CAPACITY: usize = 64;

/// What retention removed in one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub readings: u64,
    pub alerts: u64,
}

/// Durable storage for readings.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Append one tick's readings.
    async fn append(&self, readings: &[Reading]) -> Result<(), MonitorError>;

    /// Delete history recorded strictly before `cutoff`.
    async fn prune(&self, cutoff: Timestamp) -> Result<PruneStats, MonitorError>;
}

// ---------------------------------------------------------------------------
// SqliteReadingStore
// ---------------------------------------------------------------------------

pub struct SqliteReadingStore {
    pool: DbPool,
}

impl SqliteReadingStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingStore for SqliteReadingStore {
    async fn append(&self, readings: &[Reading]) -> Result<(), MonitorError> {
        ReadingRepo::insert_batch(&self.pool, readings)
            .await
            .map_err(MonitorError::StorageWriteFailure)
    }

    async fn prune(&self, cutoff: Timestamp) -> Result<PruneStats, MonitorError> {
        let readings = ReadingRepo::delete_older_than(&self.pool, cutoff)
            .await
            .map_err(MonitorError::StoragePruneFailure)?;
        let alerts = AlertRepo::delete_older_than(&self.pool, cutoff)
            .await
            .map_err(MonitorError::StoragePruneFailure)?;
        Ok(PruneStats { readings, alerts })
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Append a batch, retrying with [`WRITE_RETRY_DELAYS`].
pub async fn write_with_retry(
    store: &dyn ReadingStore,
    batch: &[Reading],
) -> Result<(), MonitorError> {
    for (attempt, delay) in WRITE_RETRY_DELAYS.iter().enumerate() {
        match store.append(batch).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    rows = batch.len(),
                    error = %e,
                    "Reading batch write failed, retrying"
                );
                tokio::time::sleep(*delay).await;
            }
        }
    }
    store.append(batch).await
}

/// Sending half of the writer queue. Dropping it lets the writer drain
/// what is queued and exit.
#[derive(Clone)]
pub struct StoreWriter {
    sender: mpsc::Sender<Vec<Reading>>,
    bus: Arc<EventBus>,
    /// Set by any dropped batch, cleared by the next stored one.
    degraded: Arc<AtomicBool>,
}

impl StoreWriter {
    /// Spawn the writer task.
    pub fn spawn(store: Arc<dyn ReadingStore>, bus: Arc<EventBus>) -> (Self, JoinHandle<()>) {
        Self::spawn_with_capacity(store, bus, WRITE_QUEUE_CAPACITY)
    }

    pub fn spawn_with_capacity(
        store: Arc<dyn ReadingStore>,
        bus: Arc<EventBus>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let degraded = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run_writer(
            store,
            Arc::clone(&bus),
            Arc::clone(&degraded),
            receiver,
        ));
        (
            Self {
                sender,
                bus,
                degraded,
            },
            handle,
        )
    }

    /// Queue a batch without waiting. Returns `false` if it was dropped.
    pub fn submit(&self, batch: Vec<Reading>) -> bool {
        if batch.is_empty() {
            return true;
        }
        match self.sender.try_send(batch) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(batch)) => {
                tracing::error!(rows = batch.len(), "Storage queue full, dropping reading batch");
                self.degraded.store(true, Ordering::SeqCst);
                self.bus.publish(MonitorEvent::StorageDegraded {
                    error: "write queue full".to_string(),
                    dropped: batch.len(),
                });
                false
            }
            Err(mpsc::error::TrySendError::Closed(batch)) => {
                tracing::error!(rows = batch.len(), "Storage writer stopped, dropping reading batch");
                false
            }
        }
    }
}

async fn run_writer(
    store: Arc<dyn ReadingStore>,
    bus: Arc<EventBus>,
    degraded: Arc<AtomicBool>,
    mut receiver: mpsc::Receiver<Vec<Reading>>,
) {

    while let Some(batch) = receiver.recv().await {
        match write_with_retry(store.as_ref(), &batch).await {
            Ok(()) => {
                tracing::debug!(rows = batch.len(), "Reading batch stored");
                if degraded.swap(false, Ordering::SeqCst) {
                    tracing::info!("Storage recovered");
                    bus.publish(MonitorEvent::StorageRecovered);
                }
            }
            Err(e) => {
                degraded.store(true, Ordering::SeqCst);
                tracing::error!(
                    rows = batch.len(),
                    error = %e,
                    "Dropping reading batch after repeated write failures"
                );
                bus.publish(MonitorEvent::StorageDegraded {
                    error: e.to_string(),
                    dropped: batch.len(),
                });
            }
        }
    }

    tracing::info!("Storage writer stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
