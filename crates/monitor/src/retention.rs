//! Periodic pruning of old readings and acknowledged alerts.
//!
//! Runs once at startup and then every `interval`. A failed pass is logged
//! and retried at the next interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nh3_core::types::Timestamp;
use tokio_util::sync::CancellationToken;

use crate::error::MonitorError;
use crate::store::{PruneStats, ReadingStore};

/// Prune everything recorded strictly before `now - retention`.
pub async fn prune_once(
    store: &dyn ReadingStore,
    now: Timestamp,
    retention: chrono::Duration,
) -> Result<PruneStats, MonitorError> {
    store.prune(now - retention).await
}

/// Run the retention loop until `cancel` is triggered.
pub async fn run(
    store: Arc<dyn ReadingStore>,
    retention_days: u32,
    interval: Duration,
    cancel: CancellationToken,
) {
    let retention = chrono::Duration::days(i64::from(retention_days));

    tracing::info!(
        retention_days,
        interval_secs = interval.as_secs(),
        "Retention job started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Retention job stopping");
                break;
            }
            _ = ticker.tick() => {
                match prune_once(store.as_ref(), Utc::now(), retention).await {
                    Ok(stats) if stats.readings > 0 || stats.alerts > 0 => {
                        tracing::info!(
                            readings = stats.readings,
                            alerts = stats.alerts,
                            "Retention: purged old rows"
                        );
                    }
                    Ok(_) => tracing::debug!("Retention: no rows to purge"),
                    Err(e) => tracing::error!(error = %e, "Retention: prune failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use nh3_core::reading::Reading;

    use super::*;

    #[derive(Default)]
    struct CutoffRecorder {
        cutoffs: Mutex<Vec<Timestamp>>,
    }

    #[async_trait]
    impl ReadingStore for CutoffRecorder {
        async fn append(&self, _readings: &[Reading]) -> Result<(), MonitorError> {
            Ok(())
        }

        async fn prune(&self, cutoff: Timestamp) -> Result<PruneStats, MonitorError> {
            self.cutoffs.lock().unwrap().push(cutoff);
            Ok(PruneStats::default())
        }
    }

    #[tokio::test]
    async fn cutoff_is_now_minus_retention() {
        let store = CutoffRecorder::default();
        let now = Utc.with_ymd_and_hms(2024, 2, 10, 6, 0, 0).unwrap();
        prune_once(&store, now, chrono::Duration::days(30)).await.unwrap();
        assert_eq!(
            store.cutoffs.lock().unwrap().as_slice(),
            &[Utc.with_ymd_and_hms(2024, 1, 11, 6, 0, 0).unwrap()]
        );
    }

    #[tokio::test]
    async fn prunes_at_startup_and_stops_on_cancel() {
        let store = Arc::new(CutoffRecorder::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            store.clone(),
            30,
            Duration::from_secs(3600),
            cancel.clone(),
        ));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while store.cutoffs.lock().unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "no startup prune");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(store.cutoffs.lock().unwrap().len(), 1);
    }
}
