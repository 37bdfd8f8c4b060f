use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "push_channel", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Expo,
    Fcm,
}

/// Audit record for one delivery attempt, successful or not. The dedupe
/// and cooldown windows are computed over these rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PushEvent {
    pub id: Uuid,
    pub device_id: String,
    pub offer_id: Uuid,
    pub co_offer_ids: Vec<Uuid>,
    pub channel: ChannelKind,
    pub success: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub category: Option<String>,
    pub distance_meters: Option<f64>,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
