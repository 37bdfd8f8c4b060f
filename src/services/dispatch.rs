use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::models::{ChannelKind, Device, OfferMatch, PushEvent};
use crate::push::{OfferNotification, PushChannel};
use crate::storage::{DeviceStore, PushEventStore};

/// One unit of dispatch work: the offers a heartbeat matched for a device.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub device_id: String,
    pub matches: Vec<OfferMatch>,
}

/// Cheap handle for enqueueing dispatch work from request handlers. A full
/// queue drops the job; notifying is best-effort and must never stall a
/// heartbeat response.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<DispatchJob>,
}

impl DispatchHandle {
    pub fn enqueue(&self, device_id: &str, matches: &[OfferMatch]) {
        if matches.is_empty() {
            return;
        }
        let job = DispatchJob {
            device_id: device_id.to_string(),
            matches: matches.to_vec(),
        };
        if let Err(e) = self.tx.try_send(job) {
            warn!(device_id, "dropping notification job: {}", e);
        }
    }
}

pub fn dispatch_channel(capacity: usize) -> (DispatchHandle, mpsc::Receiver<DispatchJob>) {
    let (tx, rx) = mpsc::channel(capacity);
    (DispatchHandle { tx }, rx)
}

/// Drain dispatch jobs until every handle is dropped.
pub async fn run_dispatch_worker(
    dispatcher: Arc<NotificationDispatcher>,
    mut rx: mpsc::Receiver<DispatchJob>,
) {
    info!("dispatch worker started");
    while let Some(job) = rx.recv().await {
        let outcome = dispatcher.dispatch(&job).await;
        debug!(device_id = %job.device_id, ?outcome, "dispatch finished");
    }
    info!("dispatch worker stopped");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { channel: ChannelKind },
    Failed { channel: ChannelKind, permanent: bool },
    NoMatches,
    NoDevice,
    NoChannel,
    CoolingDown,
    Duplicate,
}

pub struct NotificationDispatcher {
    devices: Arc<dyn DeviceStore>,
    push_events: Arc<dyn PushEventStore>,
    channels: Vec<Arc<dyn PushChannel>>,
    config: DispatchConfig,
}

impl NotificationDispatcher {
    /// `channels` is in priority order; the first ready channel with a
    /// stored credential gets the send.
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        push_events: Arc<dyn PushEventStore>,
        channels: Vec<Arc<dyn PushChannel>>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            devices,
            push_events,
            channels,
            config,
        }
    }

    /// Run one job through the delivery rules: device lookup, global
    /// cooldown, per-offer dedupe, channel selection, a single delivery
    /// attempt, audit record, credential hygiene. No retries; the next
    /// heartbeat is the retry.
    pub async fn dispatch(&self, job: &DispatchJob) -> DispatchOutcome {
        if job.matches.is_empty() {
            return DispatchOutcome::NoMatches;
        }
        let device_id = job.device_id.as_str();
        let now = Utc::now();

        let device = match self.devices.find(device_id).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                debug!(device_id, "no device on file, skipping dispatch");
                return DispatchOutcome::NoDevice;
            }
            Err(e) => {
                warn!(device_id, "device lookup failed: {}", e);
                return DispatchOutcome::NoDevice;
            }
        };

        // Global cooldown: one notification per device per window, across
        // all offers. Lookup failures err on the quiet side.
        let cooldown_start = now - Duration::seconds(self.config.cooldown_sec);
        match self
            .push_events
            .device_success_since(device_id, cooldown_start)
            .await
        {
            Ok(false) => {}
            Ok(true) => {
                debug!(device_id, "inside push cooldown");
                return DispatchOutcome::CoolingDown;
            }
            Err(e) => {
                warn!(device_id, "cooldown lookup failed: {}", e);
                return DispatchOutcome::CoolingDown;
            }
        }

        // Per-offer dedupe: the nearest match is the one and only primary.
        // If it was already pushed inside the window the whole job aborts;
        // promoting a farther offer instead would turn a stationary device
        // into a carousel of its neighbours, one push per cooldown.
        let primary = &job.matches[0];
        let dedupe_start = now - Duration::seconds(self.config.dedupe_sec);
        match self
            .push_events
            .offer_success_since(device_id, primary.id, dedupe_start)
            .await
        {
            Ok(false) => {}
            Ok(true) => {
                debug!(device_id, offer_id = %primary.id, "primary offer recently notified");
                return DispatchOutcome::Duplicate;
            }
            Err(e) => {
                warn!(device_id, "dedupe lookup failed: {}", e);
                return DispatchOutcome::Duplicate;
            }
        }
        let co_offer_ids: Vec<Uuid> = job.matches[1..].iter().map(|m| m.id).collect();

        let Some((channel, token)) = self.select_channel(&device) else {
            debug!(device_id, "no usable push channel");
            return DispatchOutcome::NoChannel;
        };

        let notification = OfferNotification {
            title: primary.title.clone(),
            body: primary.body.clone(),
            offer_id: primary.id,
            co_offer_ids: co_offer_ids.clone(),
            category: primary.category.clone(),
            distance_meters: primary.distance_meters,
        };
        let result = channel.deliver(&token, &notification).await;

        // Audit trail is written for every attempt, success or failure.
        let event = PushEvent {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            offer_id: primary.id,
            co_offer_ids,
            channel: channel.kind(),
            success: result.is_ok(),
            error_code: result.as_ref().err().map(|e| e.code()),
            error_message: result.as_ref().err().map(|e| e.to_string()),
            category: Some(primary.category.clone()),
            distance_meters: Some(primary.distance_meters),
            sent_at: now,
            expires_at: now + Duration::days(self.config.push_event_retention_days),
        };
        if let Err(e) = self.push_events.record(&event).await {
            warn!(device_id, "failed to record push event: {}", e);
        }

        match result {
            Ok(()) => {
                info!(
                    device_id,
                    offer_id = %primary.id,
                    channel = ?channel.kind(),
                    distance_m = primary.distance_meters,
                    "push delivered"
                );
                DispatchOutcome::Delivered {
                    channel: channel.kind(),
                }
            }
            Err(err) => {
                let permanent = err.is_permanent();
                if permanent {
                    match self.devices.clear_credential(device_id, channel.kind()).await {
                        Ok(()) => {
                            info!(device_id, channel = ?channel.kind(), "cleared dead push credential")
                        }
                        Err(e) => warn!(device_id, "failed to clear credential: {}", e),
                    }
                }
                warn!(device_id, channel = ?channel.kind(), permanent, "push delivery failed: {}", err);
                DispatchOutcome::Failed {
                    channel: channel.kind(),
                    permanent,
                }
            }
        }
    }

    fn select_channel(&self, device: &Device) -> Option<(Arc<dyn PushChannel>, String)> {
        for channel in &self.channels {
            if !channel.is_ready() {
                continue;
            }
            let token = match channel.kind() {
                ChannelKind::Expo => device.primary_token.clone(),
                ChannelKind::Fcm => device.secondary_token.clone(),
            };
            if let Some(token) = token.filter(|t| !t.is_empty()) {
                return Some((channel.clone(), token));
            }
        }
        None
    }
}
