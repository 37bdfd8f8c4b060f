//! Simulated roaming device for exercising a trailbeat backend end to end:
//! registers itself, then drives the full heartbeat scheduler from a
//! synthetic walk until interrupted.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trailbeat::models::{device_id_from_credential, RegisterDeviceRequest};
use trailbeat::scheduler::{
    EngineConfig, HeartbeatEngine, HeartbeatTransport, HttpTransport, SendOutcome, SimulatedDriver,
    TriggerReason,
};

struct AgentConfig {
    api_base: String,
    device_id: Option<String>,
    push_token: String,
    fcm_token: Option<String>,
    platform: String,
    interests: Vec<String>,
    start_lat: f64,
    start_lng: f64,
    bearing_deg: f64,
    speed_mps: f64,
    fix_interval: Duration,
}

impl AgentConfig {
    fn load() -> Self {
        dotenvy::dotenv().ok();

        Self {
            api_base: env::var("AGENT_API_BASE")
                .unwrap_or_else(|_| "http://localhost:4000/api".to_string()),
            device_id: env::var("AGENT_DEVICE_ID").ok(),
            push_token: env::var("AGENT_PUSH_TOKEN")
                .unwrap_or_else(|_| "ExponentPushToken[simulated-agent]".to_string()),
            fcm_token: env::var("AGENT_FCM_TOKEN").ok(),
            platform: env::var("AGENT_PLATFORM").unwrap_or_else(|_| "android".to_string()),
            interests: env::var("AGENT_INTERESTS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            // Defaults walk out of the old town of Santiago de Compostela.
            start_lat: env::var("AGENT_START_LAT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(42.8806),
            start_lng: env::var("AGENT_START_LNG")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(-8.5449),
            bearing_deg: env::var("AGENT_BEARING_DEG")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(120.0),
            speed_mps: env::var("AGENT_SPEED_MPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.4),
            fix_interval: Duration::from_secs(
                env::var("AGENT_FIX_INTERVAL_SEC")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trailbeat=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::load();

    let transport = Arc::new(HttpTransport::new(
        config.api_base.clone(),
        Duration::from_secs(10),
    )?);

    let device_id = config
        .device_id
        .clone()
        .unwrap_or_else(|| device_id_from_credential(&config.push_token));

    let registered = transport
        .register_device(&RegisterDeviceRequest {
            device_id: Some(device_id.clone()),
            platform: Some(config.platform.clone()),
            primary_token: Some(config.push_token.clone()),
            secondary_token: config.fcm_token.clone(),
        })
        .await
        .context("device registration failed")?;
    info!(
        device_id = %registered.device.device_id,
        platform = ?registered.device.platform,
        "registered against {}",
        config.api_base
    );

    let driver = Arc::new(SimulatedDriver::new(
        config.start_lat,
        config.start_lng,
        config.bearing_deg,
        config.speed_mps,
        config.fix_interval,
    ));

    let mut engine_config = EngineConfig::for_device(device_id);
    engine_config.interests = config.interests.clone();
    let engine = Arc::new(HeartbeatEngine::new(transport, driver, engine_config));

    // Forced startup send; a failure here is not fatal, the watchdog
    // recovers once the backend is reachable.
    match engine.send_now(TriggerReason::Init).await {
        SendOutcome::Sent(ack) => info!(
            next_poll_sec = ack.next_poll_sec,
            offers = ack.offers.len(),
            "initial heartbeat acknowledged"
        ),
        other => warn!(?other, "initial heartbeat did not land"),
    }

    let background = {
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_background().await {
                tracing::error!("background consumer exited: {}", e);
            }
        })
    };
    let foreground = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_foreground_loop().await })
    };
    let watchdog = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_watchdog().await })
    };

    info!("agent running, ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    background.abort();
    foreground.abort();
    watchdog.abort();

    Ok(())
}
