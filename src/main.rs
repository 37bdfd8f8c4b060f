use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trailbeat::config::Config;
use trailbeat::push::{ExpoChannel, FcmChannel, PushChannel};
use trailbeat::services::{dispatch_channel, run_dispatch_worker, NotificationDispatcher};
use trailbeat::storage::{
    run_retention_sweeper, PostgresDeviceStore, PostgresHeartbeatStore, PostgresOfferStore,
    PostgresPushEventStore,
};
use trailbeat::{api, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trailbeat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load();
    tracing::info!("Starting server in {} mode", config.server.environment);

    // Initialize database pool
    let db = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database_url())
        .await?;
    tracing::info!("Connected to PostgreSQL");

    // Run migrations
    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("Database migrations completed");

    // Initialize stores
    let devices = Arc::new(PostgresDeviceStore::new(db.clone()));
    let heartbeats = Arc::new(PostgresHeartbeatStore::new(db.clone()));
    let offers = Arc::new(PostgresOfferStore::new(db.clone()));
    let push_events = Arc::new(PostgresPushEventStore::new(db.clone()));

    // Push channels, in delivery priority order
    let expo = ExpoChannel::new(config.push.expo_url.clone(), config.push.timeout)?;
    let fcm = FcmChannel::new(
        config.push.fcm_url.clone(),
        config.push.fcm_server_key.clone(),
        config.push.timeout,
    )?;
    let channels: Vec<Arc<dyn PushChannel>> = vec![Arc::new(expo), Arc::new(fcm)];
    if config.push.fcm_server_key.is_none() {
        tracing::warn!("FCM_SERVER_KEY not set, FCM channel disabled");
    }

    // Spawn notification dispatch worker
    let (dispatch, dispatch_rx) = dispatch_channel(config.dispatch.queue_capacity);
    let dispatcher = Arc::new(NotificationDispatcher::new(
        devices.clone(),
        push_events.clone(),
        channels,
        config.dispatch.clone(),
    ));
    tokio::spawn(async move {
        run_dispatch_worker(dispatcher, dispatch_rx).await;
    });

    // Spawn retention sweeper for expired heartbeats and push events
    tokio::spawn(run_retention_sweeper(
        db.clone(),
        config.dispatch.sweep_interval,
    ));

    // Create app state
    let state = AppState {
        db,
        devices,
        heartbeats,
        offers,
        push_events,
        dispatch,
        config: Arc::new(config.clone()),
        started_at: Instant::now(),
    };

    // Build router
    let app = Router::new()
        .route("/", get(root))
        .route("/api/health", get(health_check))
        .nest("/api", api::router::create_router(state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(100 * 1024))
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn root() -> Json<Value> {
    Json(json!({ "ok": true, "message": "trailbeat backend ready. See /api/health" }))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let db = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Json(json!({
        "ok": true,
        "service": "trailbeat",
        "env": state.config.server.environment,
        "db": db,
        "time": Utc::now(),
        "uptimeSec": state.started_at.elapsed().as_secs(),
    }))
}
