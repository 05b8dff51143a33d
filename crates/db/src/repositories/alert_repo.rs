//! Repository for the `alerts` table.

use nh3_core::types::{DbId, Timestamp};

use crate::models::alert::{Alert, CreateAlert};
use crate::DbPool;

const COLUMNS: &str = "\
    id, sensor_id, alert_type, value, threshold, message, \
    acknowledged, acknowledged_at, acknowledged_by, created_at";

pub struct AlertRepo;

impl AlertRepo {
    /// Record an alert, returning the stored row.
    pub async fn insert(pool: &DbPool, alert: &CreateAlert) -> Result<Alert, sqlx::Error> {
        let query = format!(
            "INSERT INTO alerts (sensor_id, alert_type, value, threshold, message, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Alert>(&query)
            .bind(alert.sensor_id)
            .bind(&alert.alert_type)
            .bind(alert.value)
            .bind(alert.threshold)
            .bind(&alert.message)
            .bind(alert.created_at)
            .fetch_one(pool)
            .await
    }

    /// Mark an alert as acknowledged, optionally naming the operator.
    ///
    /// Returns `true` if an unacknowledged alert was updated.
    pub async fn acknowledge(
        pool: &DbPool,
        id: DbId,
        at: Timestamp,
        acknowledged_by: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE alerts SET acknowledged = 1, acknowledged_at = $2, acknowledged_by = $3 \
             WHERE id = $1 AND acknowledged = 0",
        )
        .bind(id)
        .bind(at)
        .bind(acknowledged_by)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn unacknowledged_count(pool: &DbPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM alerts WHERE acknowledged = 0")
            .fetch_one(pool)
            .await
    }

    /// Most recent alerts, newest first.
    pub async fn list_recent(pool: &DbPool, limit: i64) -> Result<Vec<Alert>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM alerts \
             ORDER BY created_at DESC, id DESC \
             LIMIT $1"
        );
        sqlx::query_as::<_, Alert>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Delete acknowledged alerts created strictly before `cutoff`.
    ///
    /// Unacknowledged alerts are never pruned. Their notification rows go
    /// with them through `ON DELETE CASCADE`.
    pub async fn delete_older_than(pool: &DbPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM alerts WHERE acknowledged = 1 AND created_at < $1")
                .bind(cutoff)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }
}
