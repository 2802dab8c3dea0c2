//! In-memory per-device state: reply cache, voice flag store, artifact cache.
//!
//! All three are process-lifetime `DashMap`s shared between the transport's delivery
//! callback and the correlator / voice sessions. Every operation touches one key.

use crate::device::{DeviceId, PendingReply, SynthesisArtifact, VoiceState};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Waiter registered by a correlated call; resolved by the next reply for the device.
struct ReplyWaiter {
    correlation_id: Uuid,
    tx: oneshot::Sender<PendingReply>,
}

/// Last-write-wins reply slot per device, plus optional per-call waiters.
#[derive(Clone, Default)]
pub struct ReplyCache {
    slots: Arc<DashMap<DeviceId, PendingReply>>,
    waiters: Arc<DashMap<DeviceId, ReplyWaiter>>,
}

impl ReplyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the reply (overwriting any unread one) and resolves a waiting call, if any.
    pub fn record(&self, reply: PendingReply) {
        if let Some((_, waiter)) = self.waiters.remove(&reply.device_id) {
            debug!(
                target: "hearth::correlator",
                device_id = %reply.device_id,
                correlation_id = %waiter.correlation_id,
                "reply resolved waiting call"
            );
            let _ = waiter.tx.send(reply.clone());
        }
        self.slots.insert(reply.device_id.clone(), reply);
    }

    /// Point-in-time read. Does not clear the slot.
    pub fn get(&self, device_id: &DeviceId) -> Option<PendingReply> {
        self.slots.get(device_id).map(|r| r.clone())
    }

    /// Registers a waiter for the next reply from `device_id`. An older waiter for the
    /// same device is dropped, so its receiver observes cancellation.
    pub fn register_waiter(&self, device_id: &DeviceId) -> (Uuid, oneshot::Receiver<PendingReply>) {
        let correlation_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.waiters
            .insert(device_id.clone(), ReplyWaiter { correlation_id, tx });
        (correlation_id, rx)
    }

    /// Removes the waiter only if it still belongs to `correlation_id`.
    pub fn cancel_waiter(&self, device_id: &DeviceId, correlation_id: Uuid) {
        self.waiters
            .remove_if(device_id, |_, w| w.correlation_id == correlation_id);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Voice capture state per device, written by device control messages and by the coordinator's reset.
#[derive(Clone, Default)]
pub struct VoiceFlagStore {
    flags: Arc<DashMap<DeviceId, VoiceState>>,
}

impl VoiceFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state; devices with no entry read as `Capturing`.
    pub fn get(&self, device_id: &DeviceId) -> VoiceState {
        self.flags
            .get(device_id)
            .map(|s| *s)
            .unwrap_or_default()
    }

    pub fn set(&self, device_id: &DeviceId, state: VoiceState) {
        self.flags.insert(device_id.clone(), state);
    }

    /// Stores the raw wire code from the device.
    pub fn set_code(&self, device_id: &DeviceId, code: i64) {
        self.set(device_id, VoiceState::from_code(code));
    }

    /// Returns the device to `Idle` (wire 0) after a session ends.
    pub fn reset(&self, device_id: &DeviceId) {
        self.set(device_id, VoiceState::Idle);
    }
}

/// Latest synthesis artifact per device. Overwritten by the next pipeline run; no history.
#[derive(Clone, Default)]
pub struct ArtifactCache {
    artifacts: Arc<DashMap<DeviceId, SynthesisArtifact>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, artifact: SynthesisArtifact) {
        self.artifacts.insert(artifact.device_id.clone(), artifact);
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<SynthesisArtifact> {
        self.artifacts.get(device_id).map(|a| a.clone())
    }
}
