use axum::{extract::State, Json};
use chrono::Utc;

use crate::{
    error::AppResult,
    models::{HeartbeatRequest, HeartbeatResponse},
    services::{HeartbeatIngest, ProximityMatcher},
    AppState,
};

pub async fn record_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> AppResult<Json<HeartbeatResponse>> {
    let ingest = HeartbeatIngest::new(
        state.heartbeats.clone(),
        state.devices.clone(),
        state.config.heartbeat.retention_days,
    );
    let heartbeat = ingest.ingest(&req).await?;

    let matcher = ProximityMatcher::new(state.offers.clone(), state.config.matching.clone());
    let offers = matcher
        .matches_for(
            heartbeat.lat,
            heartbeat.lng,
            heartbeat.interests.as_deref(),
            Utc::now(),
        )
        .await;

    // Notification delivery happens off the request path; a saturated queue
    // costs matches their push, never the heartbeat.
    state.dispatch.enqueue(&heartbeat.device_id, &offers);

    Ok(Json(HeartbeatResponse {
        ok: true,
        next_poll_sec: state.config.heartbeat.nominal_interval_sec,
        saved_id: heartbeat.id,
        offers,
    }))
}
