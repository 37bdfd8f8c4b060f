use axum::{extract::State, Json};

use crate::{
    error::AppResult,
    models::{DeviceSummary, RegisterDeviceRequest, RegisterDeviceResponse},
    services::DeviceRegistry,
    AppState,
};

pub async fn register_device(
    State(state): State<AppState>,
    Json(req): Json<RegisterDeviceRequest>,
) -> AppResult<Json<RegisterDeviceResponse>> {
    let registry = DeviceRegistry::new(state.devices.clone());
    let device = registry.register(req).await?;

    Ok(Json(RegisterDeviceResponse {
        ok: true,
        device: DeviceSummary::from(&device),
    }))
}
