//! Repository for the `sensors` table.

use chrono::Utc;
use nh3_core::sensor::SensorConfig;

use crate::models::sensor::SensorRow;
use crate::DbPool;

const COLUMNS: &str = "\
    id, name, address, unit, min_value, max_value, \
    warning_threshold, alarm_threshold, enabled, updated_at";

pub struct SensorRepo;

impl SensorRepo {
    /// Insert or update a sensor definition by id.
    pub async fn upsert(pool: &DbPool, sensor: &SensorConfig) -> Result<SensorRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO sensors ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO UPDATE SET \
                name = excluded.name, \
                address = excluded.address, \
                unit = excluded.unit, \
                min_value = excluded.min_value, \
                max_value = excluded.max_value, \
                warning_threshold = excluded.warning_threshold, \
                alarm_threshold = excluded.alarm_threshold, \
                enabled = excluded.enabled, \
                updated_at = excluded.updated_at \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, SensorRow>(&query)
            .bind(sensor.id)
            .bind(&sensor.name)
            .bind(i64::from(sensor.address))
            .bind(&sensor.unit)
            .bind(sensor.min_value)
            .bind(sensor.max_value)
            .bind(sensor.warning_threshold)
            .bind(sensor.alarm_threshold)
            .bind(sensor.enabled)
            .bind(Utc::now())
            .fetch_one(pool)
            .await
    }

    /// Mirror the configured sensor set into the table.
    ///
    /// Rows whose definition is unchanged are left alone. Sensors removed
    /// from the configuration keep their row so historical readings stay
    /// joinable; they are marked disabled instead.
    pub async fn sync(pool: &DbPool, sensors: &[SensorConfig]) -> Result<usize, sqlx::Error> {
        let existing = Self::list(pool).await?;
        let mut changed = 0;

        for sensor in sensors {
            let current = existing.iter().find(|row| row.id == sensor.id);
            if current.map_or(true, |row| !row.matches(sensor)) {
                Self::upsert(pool, sensor).await?;
                changed += 1;
            }
        }

        for row in existing.iter().filter(|row| row.enabled) {
            if !sensors.iter().any(|s| s.id == row.id) {
                sqlx::query("UPDATE sensors SET enabled = 0, updated_at = $1 WHERE id = $2")
                    .bind(Utc::now())
                    .bind(row.id)
                    .execute(pool)
                    .await?;
                changed += 1;
            }
        }

        Ok(changed)
    }

    /// List all sensor rows ordered by id.
    pub async fn list(pool: &DbPool) -> Result<Vec<SensorRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sensors ORDER BY id");
        sqlx::query_as::<_, SensorRow>(&query).fetch_all(pool).await
    }
}
