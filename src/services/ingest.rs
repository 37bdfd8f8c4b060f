use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::geo;
use crate::models::{Heartbeat, HeartbeatRequest};
use crate::storage::{DeviceStore, HeartbeatStore};

pub struct HeartbeatIngest {
    heartbeats: Arc<dyn HeartbeatStore>,
    devices: Arc<dyn DeviceStore>,
    retention_days: i64,
}

impl HeartbeatIngest {
    pub fn new(
        heartbeats: Arc<dyn HeartbeatStore>,
        devices: Arc<dyn DeviceStore>,
        retention_days: i64,
    ) -> Self {
        Self {
            heartbeats,
            devices,
            retention_days,
        }
    }

    /// Validate, normalize and persist one heartbeat sample, refreshing the
    /// device's liveness bookkeeping in the same pass.
    pub async fn ingest(&self, req: &HeartbeatRequest) -> AppResult<Heartbeat> {
        let device_id = req.device_id.trim();
        if device_id.is_empty() {
            return Err(AppError::Validation("deviceId required".to_string()));
        }

        let coords = geo::check_coordinates(req.lat, req.lng)?;
        if coords.swapped {
            tracing::warn!(
                device_id,
                lat = req.lat,
                lng = req.lng,
                "repaired transposed coordinates"
            );
        }

        let now = Utc::now();
        let heartbeat = Heartbeat {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            lat: coords.lat,
            lng: coords.lng,
            accuracy: req.accuracy.filter(|a| a.is_finite() && *a >= 0.0),
            recorded_at: req.ts.unwrap_or(now),
            received_at: now,
            battery_level: req.battery.and_then(|b| b.level),
            battery_charging: req.battery.and_then(|b| b.charging),
            power_state: normalize_tag(req.power_state.as_deref()),
            interests: normalize_interests(req.interests.as_deref()),
            source: normalize_tag(req.source.as_deref()),
            expires_at: now + Duration::days(self.retention_days),
        };

        // Device row first: heartbeats reference it, and a sample from a
        // never-registered device must still create the minimal row.
        self.devices.touch_last_seen(device_id, now).await?;
        self.heartbeats.insert(&heartbeat).await?;

        tracing::info!(
            device_id,
            heartbeat_id = %heartbeat.id,
            source = heartbeat.source.as_deref().unwrap_or("unknown"),
            "heartbeat stored"
        );
        Ok(heartbeat)
    }
}

fn normalize_tag(raw: Option<&str>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Trim, lowercase and dedupe interest tags, preserving order.
fn normalize_interests(raw: Option<&[String]>) -> Option<Vec<String>> {
    let list = raw?;
    let mut out: Vec<String> = Vec::new();
    for item in list {
        let tag = item.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}
