//! Realtime audio ingestion over WebSocket and the synthesized-audio lookup.

use crate::AppState;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    Json,
};
use hearth_core::{DeviceId, HearthError, HearthResult};
use hearth_voice::{AudioLink, LinkEvent};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// `AudioLink` over an accepted axum WebSocket.
pub struct WsLink {
    socket: WebSocket,
    open: bool,
}

impl WsLink {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket, open: true }
    }
}

#[async_trait]
impl AudioLink for WsLink {
    async fn next_chunk(&mut self, wait: Duration) -> LinkEvent {
        if !self.open {
            return LinkEvent::Closed;
        }
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.socket.recv()).await {
                Err(_) => return LinkEvent::Idle,
                Ok(Some(Ok(Message::Binary(bytes)))) => return LinkEvent::Chunk(bytes),
                Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => {
                    self.open = false;
                    return LinkEvent::Closed;
                }
                // Text, ping and pong frames carry no audio.
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    async fn send_text(&mut self, text: &str) -> HearthResult<()> {
        self.socket
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| HearthError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        if self.open {
            let _ = self.socket.send(Message::Close(None)).await;
            self.open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// GET /audio_stream/ws/:client_id
pub async fn audio_ws(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!(target: "hearth::gateway", device_id = %client_id, "audio stream connection");
    ws.on_upgrade(move |socket| async move {
        let mut link = WsLink::new(socket);
        state
            .coordinator
            .run(DeviceId::from(client_id), &mut link)
            .await;
    })
}

#[derive(Debug, Deserialize)]
pub struct AudioUrlQuery {
    pub client_id: String,
}

/// GET /audio_stream/get-audio-url?client_id=
pub async fn get_audio_url(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AudioUrlQuery>,
) -> Json<Value> {
    match state.artifacts.get(&DeviceId::from(q.client_id)) {
        Some(artifact) => Json(json!({
            "success": true,
            "audio_url": artifact.url,
        })),
        None => Json(json!({
            "success": false,
            "message": "Audio URL not found",
        })),
    }
}
