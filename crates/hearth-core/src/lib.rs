//! hearth-core: device model, per-device stores, pub/sub transport seam, and the command correlator.
//!
//! The transport's delivery callback (`DeliveryRouter`) is the only writer of device
//! replies and voice codes; the correlator and voice sessions read them back through
//! the shared stores.

pub mod config;
pub mod correlator;
pub mod device;
pub mod error;
pub mod store;
pub mod transport;

pub use config::{
    CoreConfig, CorrelationMode, CorrelatorConfig, DialogueConfig, SttConfig, SynthesisConfig,
    VoiceConfig,
};
pub use correlator::{CommandCorrelator, CommandKind};
pub use device::{plain_http_url, DeviceId, PendingReply, SynthesisArtifact, VoiceState};
pub use error::{HearthError, HearthResult};
pub use store::{ArtifactCache, ReplyCache, VoiceFlagStore};
pub use transport::{
    BusMessage, Delivery, DeliveryRouter, LocalBroker, Topic, Transport,
    SERVER_COMMANDS,
};
