//! Per-channel delivery records.

use nh3_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `notifications` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Notification {
    pub id: DbId,
    pub alert_id: DbId,
    /// Channel name, e.g. `email` or `whatsapp`.
    pub channel: String,
    pub recipient: String,
    pub delivered: bool,
    pub error: Option<String>,
    pub created_at: Timestamp,
}

/// DTO for recording a delivery attempt.
#[derive(Debug, Clone)]
pub struct CreateNotification {
    pub alert_id: DbId,
    pub channel: String,
    pub recipient: String,
    pub delivered: bool,
    pub error: Option<String>,
    pub created_at: Timestamp,
}
