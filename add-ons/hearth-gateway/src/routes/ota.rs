//! Firmware update check/trigger through the command correlator.

use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use hearth_core::{CommandKind, DeviceId};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// `type` arrives either as the dashboard's number (0 = check, 1 = update) or by name.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OtaType {
    Code(i64),
    Name(CommandKind),
}

impl OtaType {
    fn kind(&self) -> Option<CommandKind> {
        match self {
            OtaType::Code(c) => CommandKind::from_code(*c),
            OtaType::Name(k) => Some(*k),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckOtaRequest {
    pub client_id: String,
    #[serde(rename = "type")]
    pub kind: OtaType,
}

/// POST /ota/check-info-ota
pub async fn check_info_ota(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckOtaRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let kind = req.kind.kind().ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": "type must be 0 (check) or 1 (update)" })),
        )
    })?;
    let device = DeviceId::from(req.client_id);

    match state.correlator.send_kind(&device, kind).await {
        Ok(payload) => {
            // Devices usually answer with JSON; keep anything else verbatim.
            let data = serde_json::from_str::<Value>(&payload).unwrap_or(Value::String(payload));
            Ok(Json(json!({ "success": true, "data": data })))
        }
        Err(e) if e.is_timeout() => {
            info!(target: "hearth::gateway", device_id = %device, ?kind, "no OTA reply");
            Ok(Json(json!({ "success": false, "message": "No response from device" })))
        }
        Err(e) => {
            warn!(target: "hearth::gateway", device_id = %device, error = %e, "OTA command failed");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(json!({ "success": false, "message": "Could not reach device" })),
            ))
        }
    }
}
