//! Conversational response generation for a finished utterance.
//!
//! `ChatCompletionDialogue` talks to an OpenAI-compatible `/chat/completions` endpoint
//! (OpenRouter by default) and keeps a short per-device history so follow-up questions
//! have context. API key: `dialogue.api_key` or `OPENROUTER_API_KEY`.

use async_trait::async_trait;
use dashmap::DashMap;
use hearth_core::{DeviceId, DialogueConfig, HearthError, HearthResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait DialogueBackend: Send + Sync {
    /// Response text for `text` spoken by `device_id`. Never empty on success.
    async fn respond(&self, device_id: &DeviceId, text: &str) -> HearthResult<String>;
}

/// Offline backend: a fixed reply, or an echo of the utterance when none is set.
#[derive(Debug, Default, Clone)]
pub struct CannedDialogue {
    reply: Option<String>,
}

impl CannedDialogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
        }
    }
}

#[async_trait]
impl DialogueBackend for CannedDialogue {
    async fn respond(&self, _device_id: &DeviceId, text: &str) -> HearthResult<String> {
        Ok(match &self.reply {
            Some(r) => r.clone(),
            None => format!("Bạn vừa nói: {}", text.trim()),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// One completed exchange kept as context.
#[derive(Debug, Clone)]
struct Turn {
    user: String,
    assistant: String,
}

pub struct ChatCompletionDialogue {
    config: DialogueConfig,
    api_key: String,
    client: reqwest::Client,
    history: Arc<DashMap<DeviceId, VecDeque<Turn>>>,
}

impl ChatCompletionDialogue {
    /// `None` when no dialogue key is configured.
    pub fn from_config(config: &DialogueConfig) -> Option<Self> {
        let key = config.api_key.as_deref()?.trim().to_string();
        if key.is_empty() {
            return None;
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| warn!(target: "hearth::voice", error = %e, "dialogue HTTP client unavailable"))
            .ok()?;
        Some(Self {
            config: config.clone(),
            api_key: key,
            client,
            history: Arc::new(DashMap::new()),
        })
    }

    fn build_messages(&self, device_id: &DeviceId, text: &str) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::new("system", self.config.system_prompt.clone())];
        if let Some(turns) = self.history.get(device_id) {
            for t in turns.iter() {
                messages.push(ChatMessage::new("user", t.user.clone()));
                messages.push(ChatMessage::new("assistant", t.assistant.clone()));
            }
        }
        messages.push(ChatMessage::new("user", text));
        messages
    }

    fn remember(&self, device_id: &DeviceId, user: &str, assistant: &str) {
        if self.config.history_turns == 0 {
            return;
        }
        let mut turns = self.history.entry(device_id.clone()).or_default();
        turns.push_back(Turn {
            user: user.to_string(),
            assistant: assistant.to_string(),
        });
        while turns.len() > self.config.history_turns {
            turns.pop_front();
        }
    }

    /// Drops the stored context for a device.
    pub fn forget(&self, device_id: &DeviceId) {
        self.history.remove(device_id);
    }
}

#[async_trait]
impl DialogueBackend for ChatCompletionDialogue {
    async fn respond(&self, device_id: &DeviceId, text: &str) -> HearthResult<String> {
        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: self.build_messages(device_id, text),
            temperature: Some(0.5),
            max_tokens: Some(256),
        };

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "hearth-voice")
            .json(&body)
            .send()
            .await
            .map_err(|e| HearthError::Dialogue(format!("chat request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(target: "hearth::voice", device_id = %device_id, %status, "chat completion rejected");
            return Err(HearthError::Dialogue(format!("chat API error {}: {}", status, body)));
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| HearthError::Dialogue(format!("chat response parse failed: {}", e)))?;

        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| HearthError::Dialogue("empty chat response".to_string()))?;

        self.remember(device_id, text, &reply);
        debug!(target: "hearth::voice", device_id = %device_id, chars = reply.len(), "dialogue reply");
        Ok(reply)
    }
}
