//! Speech synthesis readiness.
//!
//! Providers accept text and answer immediately with a job URL; the audio file appears at
//! that URL some time later. `SynthesisResolver` submits, then polls the URL with
//! body-less checks until the file is there or the attempt budget runs out.

use async_trait::async_trait;
use hearth_core::{HearthError, HearthResult, SynthesisConfig};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    /// Queue `text` for synthesis and return the job URL. Rejections are `Submission` errors.
    async fn submit(&self, text: &str) -> HearthResult<String>;

    /// One existence check. `Ok(false)` means not yet; `Err` is a transient check failure.
    async fn check(&self, url: &str) -> HearthResult<bool>;
}

/// Submit-then-poll loop around a provider.
#[derive(Clone)]
pub struct SynthesisResolver {
    provider: Arc<dyn SynthesisProvider>,
    poll_interval: Duration,
    retry_backoff: Duration,
    max_attempts: u32,
}

impl SynthesisResolver {
    pub fn new(provider: Arc<dyn SynthesisProvider>, config: &SynthesisConfig) -> Self {
        Self {
            provider,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Returns the job URL once a check reports it available.
    pub async fn synthesize(&self, text: &str) -> HearthResult<String> {
        let url = self.provider.submit(text).await?;
        debug!(target: "hearth::synthesis", %url, "synthesis job accepted");

        for attempt in 1..=self.max_attempts {
            let last = attempt == self.max_attempts;
            match self.provider.check(&url).await {
                Ok(true) => {
                    info!(target: "hearth::synthesis", %url, attempt, "audio ready");
                    return Ok(url);
                }
                Ok(false) => {
                    debug!(target: "hearth::synthesis", attempt, max = self.max_attempts, "audio not ready");
                    if !last {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
                Err(e) => {
                    warn!(target: "hearth::synthesis", attempt, error = %e, "readiness check failed");
                    if !last {
                        tokio::time::sleep(self.retry_backoff).await;
                    }
                }
            }
        }

        Err(HearthError::Timeout(format!(
            "audio not available after {} checks: {}",
            self.max_attempts, url
        )))
    }
}

#[derive(Debug, Deserialize)]
struct FptResponse {
    #[serde(default)]
    error: i64,
    #[serde(rename = "async")]
    job_url: Option<String>,
    message: Option<String>,
}

/// FPT.AI-style TTS v5: text in the POST body, options as headers, JSON reply carrying the
/// job URL in `async`.
pub struct FptTts {
    config: SynthesisConfig,
    api_key: String,
    client: reqwest::Client,
}

impl FptTts {
    /// `None` when no TTS key is configured.
    pub fn from_config(config: &SynthesisConfig) -> Option<Self> {
        let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| warn!(target: "hearth::voice", error = %e, "TTS HTTP client unavailable"))
            .ok()?;
        Some(Self {
            config: config.clone(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl SynthesisProvider for FptTts {
    async fn submit(&self, text: &str) -> HearthResult<String> {
        let res = self
            .client
            .post(&self.config.api_url)
            .header("api-key", &self.api_key)
            .header("speed", &self.config.speed)
            .header("voice", &self.config.voice)
            .header("format", &self.config.format)
            .body(text.as_bytes().to_vec())
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(HearthError::Submission(format!("TTS API error {}: {}", status, body)));
        }

        let parsed: FptResponse = res
            .json()
            .await
            .map_err(|e| HearthError::Submission(format!("TTS response parse failed: {}", e)))?;
        parse_job(parsed)
    }

    async fn check(&self, url: &str) -> HearthResult<bool> {
        let res = self
            .client
            .head(url)
            .timeout(Duration::from_secs(self.config.check_timeout_secs))
            .send()
            .await?;
        Ok(res.status() == StatusCode::OK)
    }
}

fn parse_job(resp: FptResponse) -> HearthResult<String> {
    if resp.error != 0 {
        return Err(HearthError::Submission(
            resp.message.unwrap_or_else(|| format!("provider error {}", resp.error)),
        ));
    }
    resp.job_url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| HearthError::Submission("provider returned no audio URL".to_string()))
}

/// Stand-in when no provider is configured: every submission is rejected.
#[derive(Debug, Default, Clone)]
pub struct UnavailableSynthesis;

#[async_trait]
impl SynthesisProvider for UnavailableSynthesis {
    async fn submit(&self, _text: &str) -> HearthResult<String> {
        Err(HearthError::Submission("no synthesis provider configured".to_string()))
    }

    async fn check(&self, _url: &str) -> HearthResult<bool> {
        Ok(false)
    }
}
