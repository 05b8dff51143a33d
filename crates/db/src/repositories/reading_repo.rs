//! Repository for the `sensor_readings` table (append-only time-series).

use nh3_core::reading::Reading;
use nh3_core::types::{DbId, SensorId, Timestamp};

use crate::models::reading::SensorReading;
use crate::DbPool;

/// Column list for `sensor_readings` SELECT queries.
const COLUMNS: &str = "id, sensor_id, value, status, recorded_at";

/// Column list for INSERT statements (excludes the generated `id`).
const INSERT_COLUMNS: &str = "sensor_id, value, status, recorded_at";

/// Bound parameters per inserted row.
const PARAMS_PER_ROW: usize = 4;

pub struct ReadingRepo;

impl ReadingRepo {
    /// Insert a single reading, returning the generated id.
    pub async fn insert(pool: &DbPool, reading: &Reading) -> Result<DbId, sqlx::Error> {
        let query = format!(
            "INSERT INTO sensor_readings ({INSERT_COLUMNS}) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id"
        );
        sqlx::query_scalar(&query)
            .bind(reading.sensor_id)
            .bind(reading.value)
            .bind(reading.status.as_str())
            .bind(reading.recorded_at)
            .fetch_one(pool)
            .await
    }

    /// Insert all readings of one acquisition tick.
    ///
    /// Uses a single multi-row INSERT, so the batch is stored entirely or
    /// not at all.
    pub async fn insert_batch(pool: &DbPool, readings: &[Reading]) -> Result<(), sqlx::Error> {
        if readings.is_empty() {
            return Ok(());
        }

        let mut query = format!("INSERT INTO sensor_readings ({INSERT_COLUMNS}) VALUES ");
        let mut param_idx = 1usize;
        for i in 0..readings.len() {
            if i > 0 {
                query.push_str(", ");
            }
            query.push('(');
            for j in 0..PARAMS_PER_ROW {
                if j > 0 {
                    query.push_str(", ");
                }
                query.push('$');
                query.push_str(&param_idx.to_string());
                param_idx += 1;
            }
            query.push(')');
        }

        let mut q = sqlx::query(&query);
        for r in readings {
            q = q
                .bind(r.sensor_id)
                .bind(r.value)
                .bind(r.status.as_str())
                .bind(r.recorded_at);
        }

        q.execute(pool).await?;
        Ok(())
    }

    /// Readings for one sensor recorded at or after `since`, newest first.
    pub async fn list_for_sensor(
        pool: &DbPool,
        sensor_id: SensorId,
        since: Timestamp,
        limit: i64,
    ) -> Result<Vec<SensorReading>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sensor_readings \
             WHERE sensor_id = $1 AND recorded_at >= $2 \
             ORDER BY recorded_at DESC, id DESC \
             LIMIT $3"
        );
        sqlx::query_as::<_, SensorReading>(&query)
            .bind(sensor_id)
            .bind(since)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// The most recent reading of every sensor, ordered by sensor id.
    pub async fn latest_per_sensor(pool: &DbPool) -> Result<Vec<SensorReading>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sensor_readings AS r \
             WHERE r.id = ( \
                SELECT l.id FROM sensor_readings AS l \
                WHERE l.sensor_id = r.sensor_id \
                ORDER BY l.recorded_at DESC, l.id DESC \
                LIMIT 1) \
             ORDER BY r.sensor_id"
        );
        sqlx::query_as::<_, SensorReading>(&query)
            .fetch_all(pool)
            .await
    }

    /// Total number of stored readings.
    pub async fn count(pool: &DbPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM sensor_readings")
            .fetch_one(pool)
            .await
    }

    /// Delete readings recorded strictly before `cutoff`.
    ///
    /// Rows exactly at the cutoff are kept. Returns the number of rows
    /// deleted.
    pub async fn delete_older_than(pool: &DbPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sensor_readings WHERE recorded_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
