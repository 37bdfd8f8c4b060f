use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::OfferMatch;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Heartbeat {
    pub id: Uuid,
    pub device_id: String,
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
    pub recorded_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub battery_level: Option<f64>,
    pub battery_charging: Option<bool>,
    pub power_state: Option<String>,
    pub interests: Option<Vec<String>>,
    pub source: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub device_id: String,
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
    /// Device-side timestamp, ISO 8601. Falls back to receive time.
    pub ts: Option<DateTime<Utc>>,
    pub interests: Option<Vec<String>>,
    pub battery: Option<BatteryInfo>,
    pub power_state: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryInfo {
    pub level: Option<f64>,
    pub charging: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub ok: bool,
    pub next_poll_sec: u32,
    pub saved_id: Uuid,
    pub offers: Vec<OfferMatch>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_request_wire_shape_is_camel_case() {
        let json = r#"{
            "deviceId": "TRB-1a2b3c4d",
            "lat": 42.88,
            "lng": -8.54,
            "accuracy": 12.5,
            "ts": "2025-08-25T09:00:00Z",
            "interests": ["albergue", "water"],
            "battery": { "level": 0.73, "charging": false },
            "powerState": "background",
            "source": "bg-location"
        }"#;
        let req: HeartbeatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.device_id, "TRB-1a2b3c4d");
        assert_eq!(req.source.as_deref(), Some("bg-location"));
        assert_eq!(req.battery.unwrap().level, Some(0.73));
        assert_eq!(req.ts.unwrap().to_rfc3339(), "2025-08-25T09:00:00+00:00");
    }

    #[test]
    fn minimal_request_parses() {
        let req: HeartbeatRequest =
            serde_json::from_str(r#"{"deviceId":"d","lat":1.0,"lng":2.0}"#).unwrap();
        assert!(req.ts.is_none());
        assert!(req.battery.is_none());
    }
}
