//! In-memory store implementations backing unit and pipeline tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::geo;
use crate::models::{ChannelKind, Device, Heartbeat, Offer, Platform, PushEvent};

use super::{
    DeviceRegistration, DeviceStore, HeartbeatStore, OfferQuery, OfferStore, PushEventStore,
    StoreError, StoreResult,
};

#[derive(Default)]
pub struct MemoryDeviceStore {
    devices: Mutex<HashMap<String, Device>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn upsert_registration(&self, registration: &DeviceRegistration) -> StoreResult<Device> {
        let now = Utc::now();
        let mut devices = self.devices.lock().await;
        let device = devices
            .entry(registration.device_id.clone())
            .and_modify(|d| {
                d.platform = registration.platform;
                if registration.primary_token.is_some() {
                    d.primary_token = registration.primary_token.clone();
                }
                if registration.secondary_token.is_some() {
                    d.secondary_token = registration.secondary_token.clone();
                }
                d.invalid = false;
                d.last_seen_at = now;
                d.updated_at = now;
            })
            .or_insert_with(|| Device {
                device_id: registration.device_id.clone(),
                platform: registration.platform,
                primary_token: registration.primary_token.clone(),
                secondary_token: registration.secondary_token.clone(),
                invalid: false,
                last_seen_at: now,
                created_at: now,
                updated_at: now,
            });
        Ok(device.clone())
    }

    async fn touch_last_seen(&self, device_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let mut devices = self.devices.lock().await;
        devices
            .entry(device_id.to_string())
            .and_modify(|d| {
                d.last_seen_at = at;
                d.invalid = false;
                d.updated_at = at;
            })
            .or_insert_with(|| Device {
                device_id: device_id.to_string(),
                platform: Platform::Unknown,
                primary_token: None,
                secondary_token: None,
                invalid: false,
                last_seen_at: at,
                created_at: at,
                updated_at: at,
            });
        Ok(())
    }

    async fn find(&self, device_id: &str) -> StoreResult<Option<Device>> {
        Ok(self.devices.lock().await.get(device_id).cloned())
    }

    async fn clear_credential(&self, device_id: &str, channel: ChannelKind) -> StoreResult<()> {
        if let Some(d) = self.devices.lock().await.get_mut(device_id) {
            match channel {
                ChannelKind::Expo => d.primary_token = None,
                ChannelKind::Fcm => d.secondary_token = None,
            }
            d.invalid = true;
            d.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryHeartbeatStore {
    heartbeats: Mutex<Vec<Heartbeat>>,
}

impl MemoryHeartbeatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Heartbeat> {
        self.heartbeats.lock().await.clone()
    }
}

#[async_trait]
impl HeartbeatStore for MemoryHeartbeatStore {
    async fn insert(&self, heartbeat: &Heartbeat) -> StoreResult<()> {
        self.heartbeats.lock().await.push(heartbeat.clone());
        Ok(())
    }

    async fn count_since(&self, device_id: Option<&str>, since: DateTime<Utc>) -> StoreResult<i64> {
        let heartbeats = self.heartbeats.lock().await;
        let count = heartbeats
            .iter()
            .filter(|h| h.recorded_at >= since)
            .filter(|h| device_id.map_or(true, |d| h.device_id == d))
            .count();
        Ok(count as i64)
    }

    async fn recent(&self, device_id: Option<&str>, limit: i64) -> StoreResult<Vec<Heartbeat>> {
        let heartbeats = self.heartbeats.lock().await;
        let mut rows: Vec<Heartbeat> = heartbeats
            .iter()
            .filter(|h| device_id.map_or(true, |d| h.device_id == d))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[derive(Default)]
pub struct MemoryOfferStore {
    offers: Mutex<Vec<Offer>>,
    failing: AtomicBool,
}

impl MemoryOfferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, offer: Offer) {
        self.offers.lock().await.push(offer);
    }

    /// Make every query fail, for exercising the degrade-to-empty path.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl OfferStore for MemoryOfferStore {
    async fn active_offers_near(&self, query: &OfferQuery) -> StoreResult<Vec<Offer>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("offer store down".into()));
        }

        let offers = self.offers.lock().await;
        let mut hits: Vec<(f64, Offer)> = offers
            .iter()
            .filter(|o| o.active && o.valid_at(query.at))
            .filter(|o| match &query.categories {
                Some(cats) if !cats.is_empty() => cats.contains(&o.category),
                _ => true,
            })
            .map(|o| {
                let d = geo::haversine_meters(query.lat, query.lng, o.lat, o.lng);
                (d, o.clone())
            })
            .filter(|(d, _)| *d <= query.max_distance_m)
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.truncate(query.limit.max(0) as usize);
        Ok(hits.into_iter().map(|(_, o)| o).collect())
    }
}

#[derive(Default)]
pub struct MemoryPushEventStore {
    events: Mutex<Vec<PushEvent>>,
}

impl MemoryPushEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<PushEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl PushEventStore for MemoryPushEventStore {
    async fn record(&self, event: &PushEvent) -> StoreResult<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }

    async fn device_success_since(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .any(|e| e.device_id == device_id && e.success && e.sent_at >= since))
    }

    async fn offer_success_since(
        &self,
        device_id: &str,
        offer_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let events = self.events.lock().await;
        Ok(events.iter().any(|e| {
            e.device_id == device_id && e.offer_id == offer_id && e.success && e.sent_at >= since
        }))
    }
}
