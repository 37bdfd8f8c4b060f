use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;
use crate::AppState;

pub fn create_router(state: AppState) -> Router<AppState> {
    // Device registration routes
    let push_routes = Router::new().route("/register", post(handlers::register::register_device));

    // Location routes
    let location_routes =
        Router::new().route("/heartbeat", post(handlers::heartbeat::record_heartbeat));

    // Reliability metrics routes
    let metrics_routes =
        Router::new().route("/heartbeat", get(handlers::metrics::heartbeat_metrics));

    // Combine all routes
    Router::new()
        .nest("/push", push_routes)
        .nest("/location", location_routes)
        .nest("/metrics", metrics_routes)
        .with_state(state)
}
