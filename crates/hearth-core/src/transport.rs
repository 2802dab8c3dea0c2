//! Pub/sub transport seam: device topic scheme, the `Transport` publish trait, the
//! inbound delivery callback, and an in-process broker.
//!
//! Topic layout matches the device firmware:
//!
//! | Topic | Direction | Meaning |
//! |-------|-----------|---------|
//! | `NC/<device>` | out | notification / command string (`OTA:CK`, `AU:ON`, ...) |
//! | `NC/<device>` | in | device notification, e.g. `OTA:INFO@<ver>@<date>@<auto>@<new>` |
//! | `CT/<device>/<vpin>` | out | control value for a virtual pin |
//! | `RP/<device>` | in | reply to a command (alias for bridges that split replies out) |
//! | `VC/<device>` | in | voice capture code |
//! | `SS/<device>/<vpin>` | in | sensor reading |

use crate::device::{DeviceId, PendingReply};
use crate::error::{HearthError, HearthResult};
use crate::store::{ReplyCache, VoiceFlagStore};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    Notify(DeviceId),
    Control(DeviceId, u32),
    Reply(DeviceId),
    Voice(DeviceId),
    Sensor(DeviceId, u32),
}

impl Topic {
    /// Parses `PREFIX/<device>[/<vpin>]`. Unknown prefixes and malformed pins yield `None`.
    pub fn parse(raw: &str) -> Option<Topic> {
        let mut parts = raw.splitn(3, '/');
        let prefix = parts.next()?;
        let device = parts.next().filter(|d| !d.is_empty())?;
        let device = DeviceId::from(device);
        let pin = parts.next();
        match (prefix, pin) {
            ("NC", None) => Some(Topic::Notify(device)),
            ("RP", None) => Some(Topic::Reply(device)),
            ("VC", None) => Some(Topic::Voice(device)),
            ("CT", Some(p)) => p.parse().ok().map(|p| Topic::Control(device, p)),
            ("SS", Some(p)) => p.parse().ok().map(|p| Topic::Sensor(device, p)),
            _ => None,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        match self {
            Topic::Notify(d)
            | Topic::Control(d, _)
            | Topic::Reply(d)
            | Topic::Voice(d)
            | Topic::Sensor(d, _) => d,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Notify(d) => write!(f, "NC/{}", d),
            Topic::Control(d, pin) => write!(f, "CT/{}/{}", d, pin),
            Topic::Reply(d) => write!(f, "RP/{}", d),
            Topic::Voice(d) => write!(f, "VC/{}", d),
            Topic::Sensor(d, pin) => write!(f, "SS/{}/{}", d, pin),
        }
    }
}

/// Outbound side of the pub/sub channel. Fire-and-forget: `Ok` means handed to the
/// transport, not delivered.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &Topic, payload: &str) -> HearthResult<()>;

    /// Publishes a command string on the device's notification topic.
    async fn publish_command(&self, device_id: &DeviceId, command: &str) -> HearthResult<()> {
        self.publish(&Topic::Notify(device_id.clone()), command).await
    }
}

/// What the delivery callback did with an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Reply(DeviceId),
    VoiceCode(DeviceId, i64),
    Sensor(DeviceId, u32),
    Ignored,
}

/// Commands the server itself publishes on `NC/`. The broker echoes them back to every
/// subscriber, so they must never be taken for device replies.
pub const SERVER_COMMANDS: [&str; 3] = ["OTA:CK", "OTA:UD", "AU:ON"];

/// Inbound delivery callback: writes replies into the reply cache and voice codes
/// into the voice flag store.
///
/// Devices answer commands on the same `NC/<device>` topic the server publishes them
/// on. Any `NC/` payload that is not one of the server's own commands is a reply.
#[derive(Clone)]
pub struct DeliveryRouter {
    replies: ReplyCache,
    flags: VoiceFlagStore,
    own_commands: Arc<Vec<String>>,
}

impl DeliveryRouter {
    pub fn new(replies: ReplyCache, flags: VoiceFlagStore) -> Self {
        Self {
            replies,
            flags,
            own_commands: Arc::new(SERVER_COMMANDS.iter().map(|c| c.to_string()).collect()),
        }
    }

    /// Also treat `command` as a server echo (e.g. a configured notify command).
    pub fn with_own_command(mut self, command: impl Into<String>) -> Self {
        let command = command.into();
        if !self.own_commands.contains(&command) {
            Arc::make_mut(&mut self.own_commands).push(command);
        }
        self
    }

    fn is_own_command(&self, payload: &str) -> bool {
        let payload = payload.trim();
        self.own_commands.iter().any(|c| c == payload)
    }

    fn record_reply(&self, device: DeviceId, payload: &str) -> Delivery {
        debug!(target: "hearth::transport", device_id = %device, payload, "command reply received");
        self.replies.record(PendingReply::new(device.clone(), payload));
        Delivery::Reply(device)
    }

    pub fn deliver(&self, topic: &str, payload: &str) -> Delivery {
        match Topic::parse(topic) {
            Some(Topic::Reply(device)) => self.record_reply(device, payload),
            Some(Topic::Notify(device)) if !self.is_own_command(payload) => {
                self.record_reply(device, payload)
            }
            Some(Topic::Voice(device)) => match payload.trim().parse::<i64>() {
                Ok(code) => {
                    info!(target: "hearth::transport", device_id = %device, code, "voice flag updated");
                    self.flags.set_code(&device, code);
                    Delivery::VoiceCode(device, code)
                }
                Err(_) => {
                    warn!(target: "hearth::transport", device_id = %device, payload, "non-integer voice code ignored");
                    Delivery::Ignored
                }
            },
            Some(Topic::Sensor(device, pin)) => {
                debug!(target: "hearth::transport", device_id = %device, pin, payload, "sensor reading");
                Delivery::Sensor(device, pin)
            }
            // Our own publishes echoed back by the bus.
            Some(Topic::Notify(_)) | Some(Topic::Control(_, _)) => Delivery::Ignored,
            None => {
                warn!(target: "hearth::transport", topic, "unrecognized topic");
                Delivery::Ignored
            }
        }
    }
}

/// One message on the local bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

/// In-process pub/sub broker on a tokio broadcast channel. Devices (or a bridge to a
/// real broker) subscribe to observe outbound commands and `inject` inbound messages.
#[derive(Clone)]
pub struct LocalBroker {
    tx: broadcast::Sender<BusMessage>,
}

impl LocalBroker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }

    /// Puts a message on the bus as if a device had published it.
    pub fn inject(&self, topic: impl Into<String>, payload: impl Into<String>) {
        let _ = self.tx.send(BusMessage {
            topic: topic.into(),
            payload: payload.into(),
        });
    }

    /// Spawns the delivery loop feeding every bus message through `router`.
    pub fn spawn_delivery(&self, router: DeliveryRouter) -> JoinHandle<()> {
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        router.deliver(&msg.topic, &msg.payload);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(target: "hearth::transport", dropped = n, "delivery loop lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Transport for LocalBroker {
    async fn publish(&self, topic: &Topic, payload: &str) -> HearthResult<()> {
        let msg = BusMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        };
        match self.tx.send(msg) {
            Ok(n) => {
                debug!(target: "hearth::transport", %topic, payload, subscribers = n, "published");
                Ok(())
            }
            // No subscriber is not an error for fire-and-forget publish.
            Err(_) if self.tx.receiver_count() == 0 => {
                debug!(target: "hearth::transport", %topic, "published with no subscribers");
                Ok(())
            }
            Err(e) => Err(HearthError::Transport(e.to_string())),
        }
    }
}
