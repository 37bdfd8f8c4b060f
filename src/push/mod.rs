pub mod expo;
pub mod fcm;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::ChannelKind;

pub use expo::ExpoChannel;
pub use fcm::FcmChannel;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("push request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("push endpoint returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("credential no longer registered: {code}")]
    NotRegistered { code: String },
    #[error("provider rejected message ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl DeliveryError {
    /// Permanent errors mean the stored credential is dead and should be
    /// dropped; everything else is worth retrying on a later cycle.
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::NotRegistered { .. })
    }

    /// Short code recorded on the push event.
    pub fn code(&self) -> String {
        match self {
            DeliveryError::Http(_) => "http".to_string(),
            DeliveryError::Status(status) => format!("http-{}", status.as_u16()),
            DeliveryError::NotRegistered { code } => code.clone(),
            DeliveryError::Rejected { code, .. } => code.clone(),
        }
    }
}

/// Content of one offer notification. The primary offer fills the visible
/// title/body; co-matched offer ids ride along in the data payload.
#[derive(Debug, Clone)]
pub struct OfferNotification {
    pub title: String,
    pub body: String,
    pub offer_id: Uuid,
    pub co_offer_ids: Vec<Uuid>,
    pub category: String,
    pub distance_meters: f64,
}

#[async_trait]
pub trait PushChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Whether the channel is configured well enough to attempt delivery.
    fn is_ready(&self) -> bool;

    async fn deliver(&self, token: &str, message: &OfferNotification)
        -> Result<(), DeliveryError>;
}
