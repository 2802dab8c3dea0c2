//! Hearth gateway: the HTTP and WebSocket surface over the correlator and voice sessions.

pub mod routes;

use axum::{
    routing::{get, post},
    Router,
};
use hearth_core::{
    ArtifactCache, CommandCorrelator, CoreConfig, DeliveryRouter, ReplyCache, Transport,
    VoiceFlagStore,
};
use hearth_voice::{
    CannedDialogue, ChatCompletionDialogue, DecoderFactory, DialogueBackend, FptTts,
    PlaceholderDecoderFactory, SynthesisProvider, SynthesisResolver, TranscriptionApiFactory,
    UnavailableSynthesis, VoiceSessionCoordinator,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared handler state. Every store inside is a cheap handle over a process-wide map.
pub struct AppState {
    pub correlator: CommandCorrelator,
    pub coordinator: Arc<VoiceSessionCoordinator>,
    pub artifacts: ArtifactCache,
    pub router: DeliveryRouter,
    pub transport: Arc<dyn Transport>,
}

/// Provider adapters plugged into the voice pipeline.
pub struct VoiceProviders {
    pub decoders: Arc<dyn DecoderFactory>,
    pub dialogue: Arc<dyn DialogueBackend>,
    pub synthesis: Arc<dyn SynthesisProvider>,
}

impl VoiceProviders {
    /// Picks a real provider wherever a key is configured, an offline stand-in otherwise.
    pub fn from_config(config: &CoreConfig) -> Self {
        let decoders: Arc<dyn DecoderFactory> = match TranscriptionApiFactory::from_config(&config.stt) {
            Some(f) => {
                info!(target: "hearth::gateway", model = %config.stt.model, "STT: transcription API");
                Arc::new(f)
            }
            None => {
                warn!(target: "hearth::gateway", "STT: placeholder (set STT_API_KEY for real transcription)");
                Arc::new(PlaceholderDecoderFactory::default())
            }
        };

        let dialogue: Arc<dyn DialogueBackend> = match ChatCompletionDialogue::from_config(&config.dialogue) {
            Some(d) => {
                info!(target: "hearth::gateway", model = %config.dialogue.model, "dialogue: chat completion");
                Arc::new(d)
            }
            None => {
                warn!(target: "hearth::gateway", "dialogue: echo (set OPENROUTER_API_KEY for real replies)");
                Arc::new(CannedDialogue::new())
            }
        };

        let synthesis: Arc<dyn SynthesisProvider> = match FptTts::from_config(&config.synthesis) {
            Some(t) => {
                info!(target: "hearth::gateway", voice = %config.synthesis.voice, "TTS: async provider");
                Arc::new(t)
            }
            None => {
                warn!(target: "hearth::gateway", "TTS: unavailable (set TTS_API_KEY); voice sessions will end without audio");
                Arc::new(UnavailableSynthesis)
            }
        };

        Self {
            decoders,
            dialogue,
            synthesis,
        }
    }
}

impl AppState {
    pub fn new(config: &CoreConfig, transport: Arc<dyn Transport>, providers: VoiceProviders) -> Self {
        let replies = ReplyCache::new();
        let flags = VoiceFlagStore::new();
        let artifacts = ArtifactCache::new();

        let correlator = CommandCorrelator::new(transport.clone(), replies.clone(), &config.correlator);
        let coordinator = Arc::new(VoiceSessionCoordinator::new(
            flags.clone(),
            artifacts.clone(),
            transport.clone(),
            providers.decoders,
            providers.dialogue,
            SynthesisResolver::new(providers.synthesis, &config.synthesis),
            config.voice.clone(),
        ));

        Self {
            correlator,
            coordinator,
            artifacts,
            router: DeliveryRouter::new(replies, flags)
                .with_own_command(config.voice.notify_command.clone()),
            transport,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/audio_stream/ws/:client_id", get(routes::audio::audio_ws))
        .route("/audio_stream/get-audio-url", get(routes::audio::get_audio_url))
        .route("/ota/check-info-ota", post(routes::ota::check_info_ota))
        .route("/mqtt/device-command", post(routes::mqtt::device_command))
        .route("/mqtt/inbound", post(routes::mqtt::inbound))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}
