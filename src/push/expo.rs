use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::models::ChannelKind;

use super::{DeliveryError, OfferNotification, PushChannel};

/// Expo push service client. Keyless hosted API, so the channel is always
/// ready; dead tokens come back as `DeviceNotRegistered` tickets.
pub struct ExpoChannel {
    client: reqwest::Client,
    url: String,
}

impl ExpoChannel {
    pub fn new(url: String, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[derive(Debug, Deserialize)]
struct ExpoResponse {
    data: Vec<ExpoTicket>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicket {
    status: String,
    message: Option<String>,
    details: Option<ExpoTicketDetails>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicketDetails {
    error: Option<String>,
}

#[async_trait]
impl PushChannel for ExpoChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Expo
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn deliver(
        &self,
        token: &str,
        message: &OfferNotification,
    ) -> Result<(), DeliveryError> {
        let payload = json!([{
            "to": token,
            "title": message.title,
            "body": message.body,
            "sound": "default",
            "priority": "high",
            "channelId": "offers",
            "data": {
                "offerId": message.offer_id,
                "coOfferIds": message.co_offer_ids,
                "category": message.category,
                "distanceMeters": message.distance_meters,
            },
        }]);

        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status));
        }

        let body: ExpoResponse = response.json().await?;
        let ticket = body
            .data
            .into_iter()
            .next()
            .ok_or_else(|| DeliveryError::Rejected {
                code: "no-ticket".to_string(),
                message: "empty ticket list".to_string(),
            })?;

        if ticket.status == "ok" {
            debug!(offer_id = %message.offer_id, "expo ticket ok");
            return Ok(());
        }

        let code = ticket
            .details
            .and_then(|d| d.error)
            .unwrap_or_else(|| "unknown".to_string());
        let message = ticket.message.unwrap_or_default();
        if code == "DeviceNotRegistered" {
            Err(DeliveryError::NotRegistered { code })
        } else {
            Err(DeliveryError::Rejected { code, message })
        }
    }
}
