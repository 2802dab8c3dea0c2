//! Hearth configuration loaded from file and environment.
//!
//! Precedence: built-in defaults < TOML file (`HEARTH_CONFIG`, default `config/hearth.toml`)
//! < environment (`HEARTH__SECTION__KEY`, e.g. `HEARTH__CORRELATOR__REPLY_WAIT_MS=300`).
//! Provider keys additionally fall back to the conventional env vars (`TTS_API_KEY`,
//! `STT_API_KEY`, `OPENROUTER_API_KEY`).

use crate::error::{HearthError, HearthResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/hearth.toml";

/// How the correlator matches a reply to a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMode {
    /// Publish, sleep the reply window, read the reply slot once.
    #[default]
    FixedDelay,
    /// Register a per-call waiter resolved by the delivery callback; the reply window is the timeout.
    ///
    /// The waiter's id stays server-side: firmware replies carry no id, so the first reply
    /// after the publish resolves whichever call is waiting. A newer call to the same device
    /// supersedes an older one, and takes the next reply even if it answers the older
    /// command. This mode only rules out replies older than the call.
    Waiter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    pub reply_wait_ms: u64,
    pub mode: CorrelationMode,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            reply_wait_ms: 200,
            mode: CorrelationMode::FixedDelay,
        }
    }
}

impl CorrelatorConfig {
    pub fn reply_wait(&self) -> Duration {
        Duration::from_millis(self.reply_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Bounded wait for one audio chunk before re-checking the voice flag.
    pub chunk_wait_ms: u64,
    /// Size of the worker pool shared by every session's decode lane.
    pub decode_workers: usize,
    /// Substituted for an empty transcript.
    pub placeholder_text: String,
    /// Published to the device once its audio artifact is cached.
    pub notify_command: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            chunk_wait_ms: 500,
            decode_workers: 4,
            placeholder_text: "Không nhận diện được giọng nói".to_string(),
            notify_command: "AU:ON".to_string(),
        }
    }
}

impl VoiceConfig {
    pub fn chunk_wait(&self) -> Duration {
        Duration::from_millis(self.chunk_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub voice: String,
    pub speed: String,
    pub format: String,
    pub poll_interval_ms: u64,
    pub retry_backoff_ms: u64,
    pub max_attempts: u32,
    pub check_timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.fpt.ai/hmi/tts/v5".to_string(),
            api_key: None,
            voice: "banmai".to_string(),
            speed: "0".to_string(),
            format: "wav".to_string(),
            poll_interval_ms: 2000,
            retry_backoff_ms: 500,
            max_attempts: 20,
            check_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Exchanges kept per device as conversation context.
    pub history_turns: usize,
    pub system_prompt: String,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            api_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            model: "meta-llama/llama-3.3-70b-instruct".to_string(),
            history_turns: 10,
            system_prompt: "You are a voice assistant running on a small home IoT speaker. \
                Answer in one or two short spoken sentences, in the user's language."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Sample rate of the PCM16 mono chunks the devices stream.
    pub sample_rate: u32,
    pub language: Option<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "whisper-1".to_string(),
            sample_rate: 16000,
            language: Some("vi".to_string()),
        }
    }
}

/// Top-level configuration for the gateway and its pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub bind_addr: String,
    #[serde(default)]
    pub correlator: CorrelatorConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub stt: SttConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            correlator: CorrelatorConfig::default(),
            voice: VoiceConfig::default(),
            synthesis: SynthesisConfig::default(),
            dialogue: DialogueConfig::default(),
            stt: SttConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Load from `HEARTH_CONFIG` (or `config/hearth.toml` if present) and the environment.
    pub fn load() -> HearthResult<Self> {
        let path = std::env::var("HEARTH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Some(Path::new(&path)))
    }

    /// Load with an explicit file. A missing file is skipped, not an error.
    pub fn load_from(path: Option<&Path>) -> HearthResult<Self> {
        let builder = config::Config::builder()
            .set_default("bind_addr", "0.0.0.0:8000")?;

        let builder = match path {
            Some(p) if p.exists() => builder.add_source(config::File::from(p)),
            _ => builder,
        };

        let built = builder
            .add_source(config::Environment::with_prefix("HEARTH").separator("__"))
            .build()?;

        let mut cfg: CoreConfig = built.try_deserialize()?;
        cfg.apply_key_fallbacks();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_key_fallbacks(&mut self) {
        if self.synthesis.api_key.is_none() {
            self.synthesis.api_key = env_opt_string("TTS_API_KEY");
        }
        if self.stt.api_key.is_none() {
            self.stt.api_key = env_opt_string("STT_API_KEY")
                .or_else(|| env_opt_string("OPENAI_API_KEY"));
        }
        if self.dialogue.api_key.is_none() {
            self.dialogue.api_key = env_opt_string("OPENROUTER_API_KEY");
        }
    }

    /// Reject settings that would wedge a pipeline (zero-sized pool, zero attempts).
    pub fn validate(&self) -> HearthResult<()> {
        if self.voice.decode_workers == 0 {
            return Err(HearthError::Config("voice.decode_workers must be at least 1".to_string()));
        }
        if self.synthesis.max_attempts == 0 {
            return Err(HearthError::Config("synthesis.max_attempts must be at least 1".to_string()));
        }
        if self.voice.chunk_wait_ms == 0 {
            return Err(HearthError::Config("voice.chunk_wait_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Effective configuration as TOML, with secrets masked.
    pub fn to_toml_redacted(&self) -> HearthResult<String> {
        let mut redacted = self.clone();
        for key in [
            &mut redacted.synthesis.api_key,
            &mut redacted.stt.api_key,
            &mut redacted.dialogue.api_key,
        ] {
            if key.is_some() {
                *key = Some("***".to_string());
            }
        }
        toml::to_string_pretty(&redacted).map_err(|e| HearthError::Config(e.to_string()))
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
