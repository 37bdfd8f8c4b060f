pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ChannelKind, Device, Heartbeat, Offer, Platform, PushEvent};

pub use postgres::{
    run_retention_sweeper, PostgresDeviceStore, PostgresHeartbeatStore, PostgresOfferStore,
    PostgresPushEventStore,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct DeviceRegistration {
    pub device_id: String,
    pub platform: Platform,
    pub primary_token: Option<String>,
    pub secondary_token: Option<String>,
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Insert or update a registration. Provided tokens replace the stored
    /// ones; absent tokens leave them untouched. Always resets `invalid`.
    async fn upsert_registration(&self, registration: &DeviceRegistration) -> StoreResult<Device>;

    /// Refresh `last_seen_at` and clear `invalid`, creating a minimal row
    /// for devices that heartbeat before ever registering.
    async fn touch_last_seen(&self, device_id: &str, at: DateTime<Utc>) -> StoreResult<()>;

    async fn find(&self, device_id: &str) -> StoreResult<Option<Device>>;

    /// Drop one channel's credential and mark the device invalid. Called
    /// when a provider reports the credential permanently dead.
    async fn clear_credential(&self, device_id: &str, channel: ChannelKind) -> StoreResult<()>;
}

#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    async fn insert(&self, heartbeat: &Heartbeat) -> StoreResult<()>;

    /// Count samples recorded since `since`, optionally scoped to a device.
    async fn count_since(&self, device_id: Option<&str>, since: DateTime<Utc>) -> StoreResult<i64>;

    /// Most recent samples, newest first, optionally scoped to a device.
    async fn recent(&self, device_id: Option<&str>, limit: i64) -> StoreResult<Vec<Heartbeat>>;
}

#[derive(Debug, Clone)]
pub struct OfferQuery {
    pub lat: f64,
    pub lng: f64,
    pub at: DateTime<Utc>,
    pub categories: Option<Vec<String>>,
    pub max_distance_m: f64,
    pub limit: i64,
}

#[async_trait]
pub trait OfferStore: Send + Sync {
    /// Active offers within `max_distance_m` of the point whose validity
    /// window contains `at`, nearest first, at most `limit` rows.
    async fn active_offers_near(&self, query: &OfferQuery) -> StoreResult<Vec<Offer>>;
}

#[async_trait]
pub trait PushEventStore: Send + Sync {
    async fn record(&self, event: &PushEvent) -> StoreResult<()>;

    /// Whether any successful push reached the device since `since`.
    async fn device_success_since(&self, device_id: &str, since: DateTime<Utc>)
        -> StoreResult<bool>;

    /// Whether a successful push for this offer reached the device since
    /// `since`.
    async fn offer_success_since(
        &self,
        device_id: &str,
        offer_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<bool>;
}
