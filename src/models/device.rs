use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub device_id: String,
    pub platform: Platform,
    pub primary_token: Option<String>,
    pub secondary_token: Option<String>,
    pub invalid: bool,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "device_platform", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Web,
    Unknown,
}

impl Platform {
    /// Lenient parse; registration payloads carry free-form platform tags.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "android" => Self::Android,
            "ios" => Self::Ios,
            "web" => Self::Web,
            _ => Self::Unknown,
        }
    }
}

/// Stable device id derived from a push credential seed. The same
/// credential always maps to the same id, so re-registrations upsert
/// instead of multiplying rows.
pub fn device_id_from_credential(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    format!("TRB-{}", &hex::encode(digest)[..8])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub device_id: Option<String>,
    pub platform: Option<String>,
    pub primary_token: Option<String>,
    pub secondary_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceResponse {
    pub ok: bool,
    pub device: DeviceSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub device_id: String,
    pub platform: Platform,
    pub has_primary_token: bool,
    pub has_secondary_token: bool,
}

impl From<&Device> for DeviceSummary {
    fn from(d: &Device) -> Self {
        Self {
            device_id: d.device_id.clone(),
            platform: d.platform,
            has_primary_token: d.primary_token.is_some(),
            has_secondary_token: d.secondary_token.is_some(),
        }
    }
}
