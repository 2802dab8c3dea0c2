//! # hearth-voice
//!
//! Realtime voice sessions for Hearth devices.
//!
//! ```text
//! device ──binary frames──▶ VoiceSessionCoordinator ──▶ DecodeLane (bounded pool)
//!   ▲                              │ flag: VC/<device>          │
//!   │                              ▼                            ▼
//!   └──── NC/<device> AU:ON ◀── SynthesisResolver ◀── DialogueBackend ◀── transcript
//! ```

pub mod dialogue;
pub mod pool;
pub mod session;
pub mod stt;
pub mod synthesis;

pub use dialogue::{CannedDialogue, ChatCompletionDialogue, DialogueBackend};
pub use pool::{DecodeLane, DecodePool, LaneReport};
pub use session::{
    AudioLink, LinkEvent, SessionPhase, SessionReport, VoiceSession, VoiceSessionCoordinator,
};
pub use stt::{
    pcm16_to_wav, DecoderFactory, PlaceholderDecoder, PlaceholderDecoderFactory, SpeechDecoder,
    TranscriptionApiDecoder, TranscriptionApiFactory,
};
pub use synthesis::{FptTts, SynthesisProvider, SynthesisResolver, UnavailableSynthesis};
