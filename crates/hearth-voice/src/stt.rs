//! **Speech decode**: turn a session's binary audio chunks into a transcript.
//!
//! A `SpeechDecoder` is stateful and owned by one session. It is always driven from a
//! blocking worker (see `pool`), so implementations may do synchronous I/O or CPU work.
//! `DecoderFactory` hands a fresh decoder to each accepted connection.

use hearth_core::{DeviceId, HearthError, HearthResult, SttConfig};
use std::time::Duration;
use tracing::debug;

/// Incremental decoder for one voice session.
pub trait SpeechDecoder: Send {
    /// Feed one chunk in receipt order. Chunks are PCM16 little-endian mono.
    fn process_chunk(&mut self, chunk: &[u8]) -> HearthResult<()>;

    /// Final text for everything fed so far. Empty when nothing was recognized.
    fn transcript(&mut self) -> HearthResult<String>;
}

/// Creates one decoder per session.
pub trait DecoderFactory: Send + Sync {
    fn create(&self, device_id: &DeviceId) -> Box<dyn SpeechDecoder>;
}

/// Encode PCM16 LE mono bytes as a WAV file for upload. A trailing odd byte is dropped.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let data_len = (pcm.len() & !1) as u32;
    let mut buf = Vec::with_capacity(44 + data_len as usize);
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.extend_from_slice(&16u16.to_le_bytes());
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    buf.extend_from_slice(&pcm[..data_len as usize]);
    buf
}

/// Offline decoder: counts audio and returns a fixed response (empty by default).
/// Used when no STT provider is configured, and as the scripted decoder in tests.
#[derive(Debug, Default, Clone)]
pub struct PlaceholderDecoder {
    response: Option<String>,
    bytes: usize,
    chunks: usize,
}

impl PlaceholderDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self {
            response: Some(s.into()),
            ..Self::default()
        }
    }
}

impl SpeechDecoder for PlaceholderDecoder {
    fn process_chunk(&mut self, chunk: &[u8]) -> HearthResult<()> {
        self.chunks += 1;
        self.bytes += chunk.len();
        Ok(())
    }

    fn transcript(&mut self) -> HearthResult<String> {
        debug!(target: "hearth::voice", chunks = self.chunks, bytes = self.bytes, "placeholder transcript");
        Ok(self.response.clone().unwrap_or_default())
    }
}

/// Factory for `PlaceholderDecoder`s sharing one response.
#[derive(Debug, Default, Clone)]
pub struct PlaceholderDecoderFactory {
    pub response: Option<String>,
}

impl DecoderFactory for PlaceholderDecoderFactory {
    fn create(&self, _device_id: &DeviceId) -> Box<dyn SpeechDecoder> {
        match &self.response {
            Some(r) => Box::new(PlaceholderDecoder::with_response(r.clone())),
            None => Box::new(PlaceholderDecoder::new()),
        }
    }
}

/// OpenAI-compatible transcription (`POST {api_url}/audio/transcriptions`).
/// Buffers the session's PCM and uploads it once as WAV when the transcript is requested.
#[derive(Debug)]
pub struct TranscriptionApiDecoder {
    config: SttConfig,
    api_key: String,
    pcm: Vec<u8>,
}

impl TranscriptionApiDecoder {
    pub fn new(config: SttConfig, api_key: String) -> Self {
        Self {
            config,
            api_key,
            pcm: Vec::new(),
        }
    }

    pub fn buffered_bytes(&self) -> usize {
        self.pcm.len()
    }
}

impl SpeechDecoder for TranscriptionApiDecoder {
    fn process_chunk(&mut self, chunk: &[u8]) -> HearthResult<()> {
        self.pcm.extend_from_slice(chunk);
        Ok(())
    }

    fn transcript(&mut self) -> HearthResult<String> {
        if self.pcm.len() < 2 {
            return Ok(String::new());
        }
        let wav = pcm16_to_wav(&self.pcm, self.config.sample_rate);
        let url = format!("{}/audio/transcriptions", self.config.api_url.trim_end_matches('/'));

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| HearthError::Decode(e.to_string()))?;
        let part = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| HearthError::Decode(e.to_string()))?;
        let mut form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone());
        if let Some(lang) = &self.config.language {
            form = form.text("language", lang.clone());
        }

        let res = client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| HearthError::Decode(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(HearthError::Decode(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().map_err(|e| HearthError::Decode(e.to_string()))?;
        Ok(json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptionApiFactory {
    config: SttConfig,
    api_key: String,
}

impl TranscriptionApiFactory {
    /// `None` when no STT key is configured.
    pub fn from_config(config: &SttConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        Some(Self {
            config: config.clone(),
            api_key,
        })
    }
}

impl DecoderFactory for TranscriptionApiFactory {
    fn create(&self, _device_id: &DeviceId) -> Box<dyn SpeechDecoder> {
        Box::new(TranscriptionApiDecoder::new(self.config.clone(), self.api_key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_describes_the_payload() {
        let pcm = [1u8, 0, 2, 0, 3];
        let wav = pcm16_to_wav(&pcm, 16000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 16000);
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 4);
        assert_eq!(wav.len(), 48);
    }

    #[test]
    fn placeholder_returns_configured_text() {
        let mut d = PlaceholderDecoder::with_response("bật đèn phòng khách");
        d.process_chunk(&[0; 320]).unwrap();
        assert_eq!(d.transcript().unwrap(), "bật đèn phòng khách");
        assert_eq!(PlaceholderDecoder::new().transcript().unwrap(), "");
    }

    #[test]
    fn api_decoder_with_no_audio_skips_the_request() {
        let mut d = TranscriptionApiDecoder::new(SttConfig::default(), "k".into());
        assert_eq!(d.transcript().unwrap(), "");
        d.process_chunk(&[0; 64]).unwrap();
        assert_eq!(d.buffered_bytes(), 64);
    }

    #[test]
    fn api_factory_requires_a_key() {
        assert!(TranscriptionApiFactory::from_config(&SttConfig::default()).is_none());
        let cfg = SttConfig {
            api_key: Some("k".into()),
            ..SttConfig::default()
        };
        assert!(TranscriptionApiFactory::from_config(&cfg).is_some());
    }
}
