use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use hearth_core::{CoreConfig, DeviceId, LocalBroker, SynthesisArtifact, VoiceState};
use hearth_gateway::{build_router, AppState, VoiceProviders};
use hearth_voice::{CannedDialogue, PlaceholderDecoderFactory, UnavailableSynthesis};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tower::ServiceExt;

fn offline_providers() -> VoiceProviders {
    VoiceProviders {
        decoders: Arc::new(PlaceholderDecoderFactory::default()),
        dialogue: Arc::new(CannedDialogue::new()),
        synthesis: Arc::new(UnavailableSynthesis),
    }
}

fn app() -> (Router, Arc<AppState>, LocalBroker) {
    let broker = LocalBroker::default();
    let state = Arc::new(AppState::new(
        &CoreConfig::default(),
        Arc::new(broker.clone()),
        offline_providers(),
    ));
    broker.spawn_delivery(state.router.clone());
    (build_router(state.clone()), state, broker)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let (app, _, _) = app();
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".into()));
}

#[tokio::test(start_paused = true)]
async fn ota_check_without_reply_reports_failure_after_the_window() {
    let (app, _, _) = app();
    let start = Instant::now();
    let (status, body) = send(&app, post_json("/ota/check-info-ota", json!({"client_id": "dev-2", "type": 0}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(false));
    assert!(body["message"].is_string());
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn ota_check_returns_the_device_reply_as_json() {
    let (app, _, broker) = app();
    let mut bus = broker.subscribe();
    let device = {
        let broker = broker.clone();
        tokio::spawn(async move {
            while let Ok(msg) = bus.recv().await {
                if msg.topic == "NC/dev-1" && msg.payload == "OTA:UD" {
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    broker.inject("RP/dev-1", r#"{"status":"updating","version":"1.4.2"}"#);
                }
            }
        })
    };

    let (status, body) = send(&app, post_json("/ota/check-info-ota", json!({"client_id": "dev-1", "type": "update"}))).await;
    device.abort();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["version"], json!("1.4.2"));
}

#[tokio::test(start_paused = true)]
async fn firmware_info_reply_on_the_notify_topic_is_returned() {
    let (app, _, broker) = app();
    let mut bus = broker.subscribe();
    let device = {
        let broker = broker.clone();
        tokio::spawn(async move {
            while let Ok(msg) = bus.recv().await {
                if msg.topic == "NC/dev-1" && msg.payload == "OTA:CK" {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    broker.inject("NC/dev-1", "OTA:INFO@1.0.3@2024-05-01@1@0");
                }
            }
        })
    };

    let (status, body) = send(&app, post_json("/ota/check-info-ota", json!({"client_id": "dev-1", "type": 0}))).await;
    device.abort();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"], json!("OTA:INFO@1.0.3@2024-05-01@1@0"));
}

#[tokio::test(start_paused = true)]
async fn non_json_reply_is_returned_verbatim() {
    let (app, state, _) = app();
    state.router.deliver("RP/dev-5", "v2.0.1");
    let (_, body) = send(&app, post_json("/ota/check-info-ota", json!({"client_id": "dev-5", "type": 0}))).await;
    assert_eq!(body["data"], json!("v2.0.1"));
}

#[tokio::test]
async fn ota_rejects_unknown_type() {
    let (app, _, _) = app();
    let (status, body) = send(&app, post_json("/ota/check-info-ota", json!({"client_id": "dev-1", "type": 7}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn device_command_publishes_on_the_control_topic() {
    let (app, _, broker) = app();
    let mut bus = broker.subscribe();
    let (status, body) = send(
        &app,
        post_json("/mqtt/device-command", json!({"token_verify": "dev-9", "virtual_pin": 3, "value": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["topic"], json!("CT/dev-9/3"));

    let msg = bus.recv().await.unwrap();
    assert_eq!(msg.topic, "CT/dev-9/3");
    assert_eq!(msg.payload, "1.0");
}

#[tokio::test]
async fn inbound_voice_code_updates_the_flag() {
    let (app, state, _) = app();
    let (_, body) = send(&app, post_json("/mqtt/inbound", json!({"topic": "VC/dev-1", "payload": "2"}))).await;
    assert_eq!(body["accepted"], json!(true));
    assert_eq!(body["kind"], json!("voice_code"));
    assert_eq!(state.coordinator.flags().get(&DeviceId::from("dev-1")), VoiceState::StopRequested(2));

    let (_, body) = send(&app, post_json("/mqtt/inbound", json!({"topic": "XX/dev-1", "payload": "2"}))).await;
    assert_eq!(body["accepted"], json!(false));
}

#[tokio::test]
async fn audio_url_lookup_is_point_in_time() {
    let (app, state, _) = app();
    let (_, body) = send(&app, get("/audio_stream/get-audio-url?client_id=dev-1")).await;
    assert_eq!(body["success"], json!(false));

    state
        .artifacts
        .put(SynthesisArtifact::ready(DeviceId::from("dev-1"), "https://file01.fpt.ai/a.wav"));
    let (_, body) = send(&app, get("/audio_stream/get-audio-url?client_id=dev-1")).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["audio_url"], json!("http://file01.fpt.ai/a.wav"));
}
