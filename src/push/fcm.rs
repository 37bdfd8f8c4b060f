use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::models::ChannelKind;

use super::{DeliveryError, OfferNotification, PushChannel};

const PERMANENT_CODES: &[&str] = &["NotRegistered", "InvalidRegistration", "MismatchSenderId"];

/// FCM legacy-send fallback channel. Only ready when a server key is
/// configured.
pub struct FcmChannel {
    client: reqwest::Client,
    url: String,
    server_key: Option<String>,
}

impl FcmChannel {
    pub fn new(
        url: String,
        server_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            server_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FcmResponse {
    success: i64,
    failure: i64,
    results: Vec<FcmResult>,
}

#[derive(Debug, Deserialize)]
struct FcmResult {
    error: Option<String>,
}

#[async_trait]
impl PushChannel for FcmChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Fcm
    }

    fn is_ready(&self) -> bool {
        self.server_key.is_some()
    }

    async fn deliver(
        &self,
        token: &str,
        message: &OfferNotification,
    ) -> Result<(), DeliveryError> {
        let key = self
            .server_key
            .as_deref()
            .ok_or_else(|| DeliveryError::Rejected {
                code: "not-configured".to_string(),
                message: "FCM server key missing".to_string(),
            })?;

        let payload = json!({
            "to": token,
            "priority": "high",
            "notification": {
                "title": message.title,
                "body": message.body,
                "android_channel_id": "offers",
            },
            "data": {
                "offerId": message.offer_id,
                "coOfferIds": message.co_offer_ids,
                "category": message.category,
                "distanceMeters": message.distance_meters,
            },
        });

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("key={key}"))
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status));
        }

        let body: FcmResponse = response.json().await?;
        if body.failure == 0 && body.success > 0 {
            debug!(offer_id = %message.offer_id, "fcm send ok");
            return Ok(());
        }

        let code = body
            .results
            .into_iter()
            .find_map(|r| r.error)
            .unwrap_or_else(|| "unknown".to_string());
        if PERMANENT_CODES.contains(&code.as_str()) {
            Err(DeliveryError::NotRegistered { code })
        } else {
            Err(DeliveryError::Rejected {
                code,
                message: "FCM send failed".to_string(),
            })
        }
    }
}
