use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::geo;
use crate::models::{ChannelKind, Device, Heartbeat, Offer, PushEvent};

use super::{
    DeviceRegistration, DeviceStore, HeartbeatStore, OfferQuery, OfferStore, PushEventStore,
    StoreResult,
};

#[derive(Clone)]
pub struct PostgresDeviceStore {
    db: PgPool,
}

impl PostgresDeviceStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DeviceStore for PostgresDeviceStore {
    async fn upsert_registration(&self, registration: &DeviceRegistration) -> StoreResult<Device> {
        let device: Device = sqlx::query_as(
            r#"
            INSERT INTO devices (device_id, platform, primary_token, secondary_token, invalid,
                                 last_seen_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, FALSE, NOW(), NOW(), NOW())
            ON CONFLICT (device_id) DO UPDATE SET
                platform = EXCLUDED.platform,
                primary_token = COALESCE(EXCLUDED.primary_token, devices.primary_token),
                secondary_token = COALESCE(EXCLUDED.secondary_token, devices.secondary_token),
                invalid = FALSE,
                last_seen_at = NOW(),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&registration.device_id)
        .bind(registration.platform)
        .bind(&registration.primary_token)
        .bind(&registration.secondary_token)
        .fetch_one(&self.db)
        .await?;

        Ok(device)
    }

    async fn touch_last_seen(&self, device_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (device_id, last_seen_at, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (device_id) DO UPDATE SET
                last_seen_at = EXCLUDED.last_seen_at,
                invalid = FALSE,
                updated_at = NOW()
            "#,
        )
        .bind(device_id)
        .bind(at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn find(&self, device_id: &str) -> StoreResult<Option<Device>> {
        let device: Option<Device> = sqlx::query_as("SELECT * FROM devices WHERE device_id = $1")
            .bind(device_id)
            .fetch_optional(&self.db)
            .await?;

        Ok(device)
    }

    async fn clear_credential(&self, device_id: &str, channel: ChannelKind) -> StoreResult<()> {
        let sql = match channel {
            ChannelKind::Expo => {
                "UPDATE devices SET primary_token = NULL, invalid = TRUE, updated_at = NOW()
                 WHERE device_id = $1"
            }
            ChannelKind::Fcm => {
                "UPDATE devices SET secondary_token = NULL, invalid = TRUE, updated_at = NOW()
                 WHERE device_id = $1"
            }
        };
        sqlx::query(sql).bind(device_id).execute(&self.db).await?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct PostgresHeartbeatStore {
    db: PgPool,
}

impl PostgresHeartbeatStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl HeartbeatStore for PostgresHeartbeatStore {
    async fn insert(&self, heartbeat: &Heartbeat) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO heartbeats (id, device_id, lat, lng, accuracy, recorded_at, received_at,
                                    battery_level, battery_charging, power_state, interests,
                                    source, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(heartbeat.id)
        .bind(&heartbeat.device_id)
        .bind(heartbeat.lat)
        .bind(heartbeat.lng)
        .bind(heartbeat.accuracy)
        .bind(heartbeat.recorded_at)
        .bind(heartbeat.received_at)
        .bind(heartbeat.battery_level)
        .bind(heartbeat.battery_charging)
        .bind(&heartbeat.power_state)
        .bind(&heartbeat.interests)
        .bind(&heartbeat.source)
        .bind(heartbeat.expires_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn count_since(&self, device_id: Option<&str>, since: DateTime<Utc>) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM heartbeats
            WHERE recorded_at >= $1 AND ($2::TEXT IS NULL OR device_id = $2)
            "#,
        )
        .bind(since)
        .bind(device_id)
        .fetch_one(&self.db)
        .await?;

        Ok(count)
    }

    async fn recent(&self, device_id: Option<&str>, limit: i64) -> StoreResult<Vec<Heartbeat>> {
        let rows: Vec<Heartbeat> = sqlx::query_as(
            r#"
            SELECT * FROM heartbeats
            WHERE $1::TEXT IS NULL OR device_id = $1
            ORDER BY recorded_at DESC
            LIMIT $2
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }
}

#[derive(Clone)]
pub struct PostgresOfferStore {
    db: PgPool,
}

impl PostgresOfferStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OfferStore for PostgresOfferStore {
    async fn active_offers_near(&self, query: &OfferQuery) -> StoreResult<Vec<Offer>> {
        // Cheap box prefilter on the lat/lng index, exact haversine cut and
        // ordering in the outer query.
        let bbox = geo::bounding_box(query.lat, query.lng, query.max_distance_m);
        let categories = query
            .categories
            .as_ref()
            .filter(|c| !c.is_empty())
            .cloned();

        let offers: Vec<Offer> = sqlx::query_as(
            r#"
            SELECT * FROM (
                SELECT *,
                       2 * 6371000 * asin(least(1.0, sqrt(
                           power(sin(radians(lat - $6) / 2), 2)
                           + cos(radians($6)) * cos(radians(lat))
                             * power(sin(radians(lng - $7) / 2), 2)
                       ))) AS distance_meters
                FROM offers
                WHERE active = TRUE
                  AND valid_from <= $1 AND valid_until > $1
                  AND lat BETWEEN $2 AND $3
                  AND lng BETWEEN $4 AND $5
                  AND ($8::TEXT[] IS NULL OR category = ANY($8::TEXT[]))
            ) candidates
            WHERE distance_meters <= $9
            ORDER BY distance_meters
            LIMIT $10
            "#,
        )
        .bind(query.at)
        .bind(bbox.min_lat)
        .bind(bbox.max_lat)
        .bind(bbox.min_lng)
        .bind(bbox.max_lng)
        .bind(query.lat)
        .bind(query.lng)
        .bind(categories)
        .bind(query.max_distance_m)
        .bind(query.limit)
        .fetch_all(&self.db)
        .await?;

        Ok(offers)
    }
}

#[derive(Clone)]
pub struct PostgresPushEventStore {
    db: PgPool,
}

impl PostgresPushEventStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PushEventStore for PostgresPushEventStore {
    async fn record(&self, event: &PushEvent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO push_events (id, device_id, offer_id, co_offer_ids, channel, success,
                                     error_code, error_message, category, distance_meters,
                                     sent_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(event.id)
        .bind(&event.device_id)
        .bind(event.offer_id)
        .bind(&event.co_offer_ids)
        .bind(event.channel)
        .bind(event.success)
        .bind(&event.error_code)
        .bind(&event.error_message)
        .bind(&event.category)
        .bind(event.distance_meters)
        .bind(event.sent_at)
        .bind(event.expires_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn device_success_since(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM push_events
                WHERE device_id = $1 AND success = TRUE AND sent_at >= $2
            )
            "#,
        )
        .bind(device_id)
        .bind(since)
        .fetch_one(&self.db)
        .await?;

        Ok(exists)
    }

    async fn offer_success_since(
        &self,
        device_id: &str,
        offer_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM push_events
                WHERE device_id = $1 AND offer_id = $2 AND success = TRUE AND sent_at >= $3
            )
            "#,
        )
        .bind(device_id)
        .bind(offer_id)
        .bind(since)
        .fetch_one(&self.db)
        .await?;

        Ok(exists)
    }
}

/// Periodically delete heartbeat and push-event rows past their
/// `expires_at`. Retention is a resource policy; nothing reads expired rows.
pub async fn run_retention_sweeper(pool: PgPool, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match sweep_expired(&pool).await {
            Ok((heartbeats, push_events)) if heartbeats > 0 || push_events > 0 => {
                debug!(heartbeats, push_events, "swept expired rows");
            }
            Ok(_) => {}
            Err(e) => warn!("retention sweep failed: {}", e),
        }
    }
}

async fn sweep_expired(pool: &PgPool) -> Result<(u64, u64), sqlx::Error> {
    let heartbeats = sqlx::query("DELETE FROM heartbeats WHERE expires_at < NOW()")
        .execute(pool)
        .await?
        .rows_affected();
    let push_events = sqlx::query("DELETE FROM push_events WHERE expires_at < NOW()")
        .execute(pool)
        .await?
        .rows_affected();
    Ok((heartbeats, push_events))
}
