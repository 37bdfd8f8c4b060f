use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::MatchingConfig;
use crate::geo;
use crate::models::{Offer, OfferMatch};
use crate::storage::{OfferQuery, OfferStore};

pub struct ProximityMatcher {
    offers: Arc<dyn OfferStore>,
    config: MatchingConfig,
}

impl ProximityMatcher {
    pub fn new(offers: Arc<dyn OfferStore>, config: MatchingConfig) -> Self {
        Self { offers, config }
    }

    /// Offers around a reported position, nearest first. Matching is
    /// best-effort: a failing offer store degrades to no matches instead of
    /// failing the heartbeat.
    pub async fn matches_for(
        &self,
        lat: f64,
        lng: f64,
        interests: Option<&[String]>,
        at: DateTime<Utc>,
    ) -> Vec<OfferMatch> {
        let query = OfferQuery {
            lat,
            lng,
            at,
            categories: interests.map(|i| i.to_vec()),
            max_distance_m: self.config.max_distance_m,
            limit: self.config.max_candidates,
        };

        let candidates = match self.offers.active_offers_near(&query).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("offer lookup failed, returning no matches: {}", e);
                return Vec::new();
            }
        };

        self.filter_candidates(lat, lng, at, &candidates)
    }

    /// Re-check window and radius on whatever the store returned, clamp
    /// each offer's radius to the global ceiling, order by distance and cap
    /// the result count.
    fn filter_candidates(
        &self,
        lat: f64,
        lng: f64,
        at: DateTime<Utc>,
        candidates: &[Offer],
    ) -> Vec<OfferMatch> {
        let mut hits: Vec<OfferMatch> = candidates
            .iter()
            .filter(|o| o.active && o.valid_at(at))
            .filter_map(|o| {
                let distance = geo::haversine_meters(lat, lng, o.lat, o.lng);
                let effective_radius = o.radius_meters.min(self.config.max_distance_m);
                if distance <= effective_radius {
                    Some(OfferMatch::from_offer(o, distance))
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
        hits.truncate(self.config.max_results);
        for hit in &mut hits {
            hit.distance_meters = hit.distance_meters.round();
        }
        hits
    }
}
