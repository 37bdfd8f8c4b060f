use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::AppResult, models::Heartbeat, storage::HeartbeatStore, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsQuery {
    pub device_id: Option<String>,
    #[serde(default = "default_minutes")]
    pub minutes: i64,
}

fn default_minutes() -> i64 {
    15
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub ok: bool,
    pub window_minutes: i64,
    pub heartbeat_seconds: u32,
    pub device_scoped: bool,
    pub observed: i64,
    pub expected: i64,
    pub success_rate: f64,
    pub last: Vec<RecentHeartbeat>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentHeartbeat {
    pub device_id: String,
    pub ts: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl From<&Heartbeat> for RecentHeartbeat {
    fn from(hb: &Heartbeat) -> Self {
        Self {
            device_id: hb.device_id.clone(),
            ts: hb.recorded_at,
            received_at: hb.received_at,
        }
    }
}

/// Heartbeat reliability over a recent window: how many samples arrived
/// versus how many the nominal cadence predicts.
pub async fn heartbeat_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> AppResult<Json<MetricsResponse>> {
    let minutes = query.minutes.clamp(1, 1440);
    let device_id = query
        .device_id
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());
    let since = Utc::now() - Duration::minutes(minutes);

    let observed = state.heartbeats.count_since(device_id, since).await?;
    let interval = state.config.heartbeat.nominal_interval_sec.max(1) as i64;
    let expected = ((minutes * 60) / interval).max(1);
    let success_rate = (observed as f64 / expected as f64).min(1.0);

    let last = state
        .heartbeats
        .recent(device_id, 5)
        .await?
        .iter()
        .map(RecentHeartbeat::from)
        .collect();

    Ok(Json(MetricsResponse {
        ok: true,
        window_minutes: minutes,
        heartbeat_seconds: state.config.heartbeat.nominal_interval_sec,
        device_scoped: device_id.is_some(),
        observed,
        expected,
        success_rate,
        last,
    }))
}
