pub mod api;
pub mod config;
pub mod error;
pub mod geo;
pub mod models;
pub mod push;
pub mod scheduler;
pub mod services;
pub mod storage;

use std::sync::Arc;
use std::time::Instant;

use config::Config;
use services::DispatchHandle;
use storage::{DeviceStore, HeartbeatStore, OfferStore, PushEventStore};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub devices: Arc<dyn DeviceStore>,
    pub heartbeats: Arc<dyn HeartbeatStore>,
    pub offers: Arc<dyn OfferStore>,
    pub push_events: Arc<dyn PushEventStore>,
    pub dispatch: DispatchHandle,
    pub config: Arc<Config>,
    pub started_at: Instant,
}
