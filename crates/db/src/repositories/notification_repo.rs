//! Repository for the `notifications` table.

use nh3_core::types::DbId;

use crate::models::notification::{CreateNotification, Notification};
use crate::DbPool;

const COLUMNS: &str = "id, alert_id, channel, recipient, delivered, error, created_at";

pub struct NotificationRepo;

impl NotificationRepo {
    /// Record one delivery attempt, returning the generated id.
    pub async fn insert(
        pool: &DbPool,
        notification: &CreateNotification,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO notifications \
                (alert_id, channel, recipient, delivered, error, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id",
        )
        .bind(notification.alert_id)
        .bind(&notification.channel)
        .bind(&notification.recipient)
        .bind(notification.delivered)
        .bind(&notification.error)
        .bind(notification.created_at)
        .fetch_one(pool)
        .await
    }

    /// Delivery records of one alert in insertion order.
    pub async fn list_for_alert(
        pool: &DbPool,
        alert_id: DbId,
    ) -> Result<Vec<Notification>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE alert_id = $1 \
             ORDER BY id"
        );
        sqlx::query_as::<_, Notification>(&query)
            .bind(alert_id)
            .fetch_all(pool)
            .await
    }
}
