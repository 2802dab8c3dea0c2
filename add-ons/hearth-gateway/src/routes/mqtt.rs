//! Device control publish and the inbound bridge into the delivery callback.

use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use hearth_core::{Delivery, DeviceId, Topic};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct DeviceCommandRequest {
    pub token_verify: String,
    pub virtual_pin: u32,
    pub value: f64,
}

/// POST /mqtt/device-command
pub async fn device_command(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeviceCommandRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let topic = Topic::Control(DeviceId::from(req.token_verify), req.virtual_pin);
    // Firmware parses the value as a float, so always send a decimal point.
    let payload = format!("{:?}", req.value);

    state.transport.publish(&topic, &payload).await.map_err(|e| {
        warn!(target: "hearth::gateway", %topic, error = %e, "control publish failed");
        (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "message": "Publish failed", "topic": topic.to_string() })),
        )
    })?;

    Ok(Json(json!({
        "message": "Command sent",
        "topic": topic.to_string(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

/// POST /mqtt/inbound: a device message relayed by a broker bridge.
pub async fn inbound(State(state): State<Arc<AppState>>, Json(msg): Json<InboundMessage>) -> Json<Value> {
    let delivered = state.router.deliver(&msg.topic, &msg.payload);
    let kind = match &delivered {
        Delivery::Reply(_) => "reply",
        Delivery::VoiceCode(_, _) => "voice_code",
        Delivery::Sensor(_, _) => "sensor",
        Delivery::Ignored => "ignored",
    };
    Json(json!({
        "accepted": delivered != Delivery::Ignored,
        "kind": kind,
    }))
}
