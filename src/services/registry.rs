use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{AppError, AppResult};
use crate::models::{device_id_from_credential, Device, Platform, RegisterDeviceRequest};
use crate::storage::{DeviceRegistration, DeviceStore};

pub struct DeviceRegistry {
    devices: Arc<dyn DeviceStore>,
}

impl DeviceRegistry {
    pub fn new(devices: Arc<dyn DeviceStore>) -> Self {
        Self { devices }
    }

    /// Upsert a device registration. The id comes from the payload when
    /// present, otherwise it is derived from a push credential.
    pub async fn register(&self, req: RegisterDeviceRequest) -> AppResult<Device> {
        let primary_token = normalize_token(req.primary_token);
        let secondary_token = normalize_token(req.secondary_token);

        let device_id = match req.device_id.map(|s| s.trim().to_string()) {
            Some(id) if !id.is_empty() => id,
            _ => {
                let seed = primary_token
                    .as_deref()
                    .or(secondary_token.as_deref())
                    .ok_or_else(|| {
                        AppError::Validation("deviceId or a push token required".to_string())
                    })?;
                device_id_from_credential(seed)
            }
        };

        let platform = Platform::parse(req.platform.as_deref().unwrap_or("android"));

        let registration = DeviceRegistration {
            device_id,
            platform,
            primary_token,
            secondary_token,
        };
        let device = self
            .devices
            .upsert_registration(&registration)
            .await
            .map_err(AppError::Registration)?;

        tracing::info!(device_id = %device.device_id, platform = ?device.platform, "device registered");
        Ok(device)
    }

    /// Refresh liveness bookkeeping as part of a heartbeat.
    pub async fn touch(&self, device_id: &str, at: DateTime<Utc>) -> AppResult<()> {
        self.devices
            .touch_last_seen(device_id, at)
            .await
            .map_err(AppError::Registration)?;
        Ok(())
    }
}

fn normalize_token(token: Option<String>) -> Option<String> {
    token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
