//! Per-device data model: identifiers, cached replies, voice capture state, synthesis artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque device identifier (the firmware's `token_verify` / client id).
/// Key for all per-device state and for pub/sub topic addressing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Most recent asynchronous reply from a device. One slot per device; a new
/// arrival overwrites whatever was there, read or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReply {
    pub device_id: DeviceId,
    pub payload: String,
    pub arrival_time: DateTime<Utc>,
}

impl PendingReply {
    pub fn new(device_id: DeviceId, payload: impl Into<String>) -> Self {
        Self {
            device_id,
            payload: payload.into(),
            arrival_time: Utc::now(),
        }
    }
}

/// Voice capture state for a device, decoded from the integer the firmware sends.
///
/// | Wire | State |
/// |------|-------|
/// | 0 (or negative) | `Idle` |
/// | 1 | `Capturing` |
/// | >1 | `StopRequested` (end of utterance) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    Idle,
    Capturing,
    /// Carries the raw code so it can be echoed back unchanged.
    StopRequested(i64),
}

impl VoiceState {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => VoiceState::Capturing,
            c if c > 1 => VoiceState::StopRequested(c),
            _ => VoiceState::Idle,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            VoiceState::Idle => 0,
            VoiceState::Capturing => 1,
            VoiceState::StopRequested(c) => *c,
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        matches!(self, VoiceState::StopRequested(_))
    }
}

impl Default for VoiceState {
    /// A device with no recorded state is treated as capturing.
    fn default() -> Self {
        VoiceState::Capturing
    }
}

/// Generated audio for a device, referenced by URL once the provider job is fetchable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisArtifact {
    pub device_id: DeviceId,
    pub url: String,
    pub ready: bool,
    pub created_at: DateTime<Utc>,
}

impl SynthesisArtifact {
    /// Build a ready artifact with the URL rewritten to plain `http://` for the devices' TLS-less clients.
    pub fn ready(device_id: DeviceId, url: &str) -> Self {
        Self {
            device_id,
            url: plain_http_url(url),
            ready: true,
            created_at: Utc::now(),
        }
    }
}

/// Rewrite a secure URL to plain HTTP. Other schemes pass through unchanged.
pub fn plain_http_url(url: &str) -> String {
    match url.strip_prefix("https://") {
        Some(rest) => format!("http://{}", rest),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_state_decodes_wire_codes() {
        assert_eq!(VoiceState::from_code(0), VoiceState::Idle);
        assert_eq!(VoiceState::from_code(-3), VoiceState::Idle);
        assert_eq!(VoiceState::from_code(1), VoiceState::Capturing);
        assert_eq!(VoiceState::from_code(2), VoiceState::StopRequested(2));
        assert!(VoiceState::from_code(7).is_stop_requested());
        assert_eq!(VoiceState::from_code(7).code(), 7);
    }

    #[test]
    fn missing_state_defaults_to_capturing() {
        assert_eq!(VoiceState::default(), VoiceState::Capturing);
    }

    #[test]
    fn artifact_url_is_downgraded_to_plain_http() {
        let a = SynthesisArtifact::ready(DeviceId::from("dev-1"), "https://file.example.com/a.wav");
        assert_eq!(a.url, "http://file.example.com/a.wav");
        assert!(a.ready);
        assert_eq!(plain_http_url("http://x/y"), "http://x/y");
    }
}
