use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Offer {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub category: String,
    pub lat: f64,
    pub lng: f64,
    pub radius_meters: f64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    /// Validity window check; `valid_until` is exclusive.
    pub fn valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && at < self.valid_until
    }
}

/// An offer paired with its distance from the reported position, as returned
/// to heartbeat clients and carried through dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferMatch {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub category: String,
    pub lat: f64,
    pub lng: f64,
    pub radius_meters: f64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub distance_meters: f64,
}

impl OfferMatch {
    pub fn from_offer(offer: &Offer, distance_meters: f64) -> Self {
        Self {
            id: offer.id,
            title: offer.title.clone(),
            body: offer.body.clone(),
            category: offer.category.clone(),
            lat: offer.lat,
            lng: offer.lng,
            radius_meters: offer.radius_meters,
            valid_from: offer.valid_from,
            valid_until: offer.valid_until,
            distance_meters,
        }
    }
}
