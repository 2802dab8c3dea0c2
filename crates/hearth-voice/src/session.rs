//! Voice session coordinator: one task per device connection.
//!
//! The device streams binary audio over a duplex link while a separate pub/sub message
//! flips its voice flag. The loop alternates between a bounded wait for one chunk and a
//! flag check, so the end-of-utterance signal is seen even when no audio arrives. Once it
//! is seen (or the link drops) the session runs the pipeline once:
//! transcript → dialogue → synthesis → artifact cache → `AU:ON` notification.

use crate::dialogue::DialogueBackend;
use crate::pool::{DecodeLane, DecodePool};
use crate::stt::DecoderFactory;
use crate::synthesis::SynthesisResolver;
use async_trait::async_trait;
use hearth_core::{
    ArtifactCache, DeviceId, HearthResult, SynthesisArtifact, Transport, VoiceConfig,
    VoiceFlagStore,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// One step of the inbound side of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Chunk(Vec<u8>),
    /// Nothing arrived within the wait.
    Idle,
    Closed,
}

/// Duplex connection to a device, abstracted over the WebSocket.
#[async_trait]
pub trait AudioLink: Send {
    /// Waits at most `wait` for the next binary frame. Text and control frames are skipped.
    async fn next_chunk(&mut self, wait: Duration) -> LinkEvent;

    async fn send_text(&mut self, text: &str) -> HearthResult<()>;

    /// Idempotent.
    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Capturing,
    Finalizing,
    Done,
}

/// Per-connection state. Never shared between tasks.
#[derive(Debug)]
pub struct VoiceSession {
    pub device_id: DeviceId,
    pub chunk_count: u64,
    phase: SessionPhase,
}

impl VoiceSession {
    fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            chunk_count: 0,
            phase: SessionPhase::Idle,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn enter(&mut self, next: SessionPhase) {
        debug!(target: "hearth::voice", device_id = %self.device_id, from = ?self.phase, to = ?next, "session phase");
        self.phase = next;
    }
}

/// What one session did, for logging and tests.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub device_id: DeviceId,
    pub chunk_count: u64,
    pub decode_failures: usize,
    pub transcript: Option<String>,
    pub response: Option<String>,
    pub artifact_url: Option<String>,
    pub error: Option<String>,
    pub phase: SessionPhase,
}

impl SessionReport {
    fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            chunk_count: 0,
            decode_failures: 0,
            transcript: None,
            response: None,
            artifact_url: None,
            error: None,
            phase: SessionPhase::Idle,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.artifact_url.is_some()
    }
}

pub struct VoiceSessionCoordinator {
    flags: VoiceFlagStore,
    artifacts: ArtifactCache,
    transport: Arc<dyn Transport>,
    decoders: Arc<dyn DecoderFactory>,
    dialogue: Arc<dyn DialogueBackend>,
    synthesis: SynthesisResolver,
    pool: DecodePool,
    config: VoiceConfig,
}

impl VoiceSessionCoordinator {
    pub fn new(
        flags: VoiceFlagStore,
        artifacts: ArtifactCache,
        transport: Arc<dyn Transport>,
        decoders: Arc<dyn DecoderFactory>,
        dialogue: Arc<dyn DialogueBackend>,
        synthesis: SynthesisResolver,
        config: VoiceConfig,
    ) -> Self {
        Self {
            pool: DecodePool::new(config.decode_workers),
            flags,
            artifacts,
            transport,
            decoders,
            dialogue,
            synthesis,
            config,
        }
    }

    pub fn flags(&self) -> &VoiceFlagStore {
        &self.flags
    }

    pub fn artifacts(&self) -> &ArtifactCache {
        &self.artifacts
    }

    /// Runs one session to completion. Errors end the session but never escape it: the
    /// device's flag is always reset and the link always closed.
    #[instrument(skip(self, link, device_id), fields(device_id = %device_id))]
    pub async fn run<L: AudioLink>(&self, device_id: DeviceId, link: &mut L) -> SessionReport {
        let mut session = VoiceSession::new(device_id.clone());
        let mut report = SessionReport::new(device_id.clone());
        let lane = self.pool.open_lane(device_id.clone(), self.decoders.create(&device_id));
        info!(target: "hearth::voice", device_id = %device_id, "voice session opened");

        session.enter(SessionPhase::Capturing);
        self.capture(&mut session, &lane, link).await;

        session.enter(SessionPhase::Finalizing);
        report.chunk_count = session.chunk_count;
        if let Err(e) = self.finalize(&session, lane, link, &mut report).await {
            error!(target: "hearth::voice", device_id = %device_id, error = %e, "voice pipeline failed");
            report.error = Some(e.to_string());
        }

        self.flags.reset(&device_id);
        link.close().await;
        session.enter(SessionPhase::Done);
        report.phase = session.phase();
        info!(
            target: "hearth::voice",
            device_id = %device_id,
            chunk_count = report.chunk_count,
            ok = report.succeeded(),
            "voice session closed"
        );
        report
    }

    async fn capture<L: AudioLink>(&self, session: &mut VoiceSession, lane: &DecodeLane, link: &mut L) {
        let wait = self.config.chunk_wait();
        loop {
            let state = self.flags.get(&session.device_id);
            if state.is_stop_requested() {
                info!(target: "hearth::voice", device_id = %session.device_id, code = state.code(), "stop requested");
                return;
            }
            match link.next_chunk(wait).await {
                LinkEvent::Chunk(bytes) => {
                    session.chunk_count += 1;
                    if session.chunk_count % 10 == 0 {
                        info!(target: "hearth::voice", device_id = %session.device_id, chunk_count = session.chunk_count, "receiving audio");
                    }
                    if let Err(e) = lane.submit(bytes) {
                        warn!(target: "hearth::voice", device_id = %session.device_id, error = %e, "chunk dropped");
                    }
                }
                LinkEvent::Idle => continue,
                LinkEvent::Closed => {
                    info!(target: "hearth::voice", device_id = %session.device_id, chunk_count = session.chunk_count, "link closed by device");
                    return;
                }
            }
        }
    }

    async fn finalize<L: AudioLink>(
        &self,
        session: &VoiceSession,
        lane: DecodeLane,
        link: &mut L,
        report: &mut SessionReport,
    ) -> HearthResult<()> {
        let device_id = &session.device_id;

        let lane_report = lane.finish().await?;
        report.decode_failures = lane_report.failures;
        let transcript = if lane_report.transcript.trim().is_empty() {
            self.config.placeholder_text.clone()
        } else {
            lane_report.transcript
        };
        info!(target: "hearth::voice", device_id = %device_id, %transcript, "transcript ready");
        report.transcript = Some(transcript.clone());

        if link.is_open() {
            if let Err(e) = link.send_text(&transcript).await {
                warn!(target: "hearth::voice", device_id = %device_id, error = %e, "could not send transcript");
            }
        }

        let response = self.dialogue.respond(device_id, &transcript).await?;
        debug!(target: "hearth::voice", device_id = %device_id, %response, "dialogue response");
        report.response = Some(response.clone());

        let url = self.synthesis.synthesize(&response).await?;
        let artifact = SynthesisArtifact::ready(device_id.clone(), &url);
        report.artifact_url = Some(artifact.url.clone());
        info!(target: "hearth::voice", device_id = %device_id, url = %artifact.url, "audio artifact cached");
        self.artifacts.put(artifact);

        self.transport
            .publish_command(device_id, &self.config.notify_command)
            .await?;
        Ok(())
    }
}
