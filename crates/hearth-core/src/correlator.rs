//! Command correlator: turns a fire-and-forget publish plus an asynchronous device reply
//! into a bounded, awaitable call.
//!
//! `FixedDelay` publishes, sleeps the reply window, and reads the reply slot once. There is
//! no correlation id, so a stale reply from an earlier call can be returned, and a reply
//! that lands after the read is only seen by the next call.
//!
//! `Waiter` registers a oneshot for the device before publishing and treats the reply window
//! as a timeout; on timeout it only accepts a cached reply newer than the call itself.

use crate::config::{CorrelationMode, CorrelatorConfig};
use crate::device::{DeviceId, PendingReply};
use crate::error::{HearthError, HearthResult};
use crate::store::ReplyCache;
use crate::transport::Transport;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Firmware update commands understood by the device's `NC/` handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Check,
    Update,
}

impl CommandKind {
    pub fn command(&self) -> &'static str {
        match self {
            CommandKind::Check => "OTA:CK",
            CommandKind::Update => "OTA:UD",
        }
    }

    /// Numeric form used by the dashboard (0 = check, 1 = update).
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(CommandKind::Check),
            1 => Some(CommandKind::Update),
            _ => None,
        }
    }
}

pub struct CommandCorrelator {
    transport: Arc<dyn Transport>,
    replies: ReplyCache,
    reply_wait: Duration,
    mode: CorrelationMode,
}

impl CommandCorrelator {
    pub fn new(transport: Arc<dyn Transport>, replies: ReplyCache, config: &CorrelatorConfig) -> Self {
        Self {
            transport,
            replies,
            reply_wait: config.reply_wait(),
            mode: config.mode,
        }
    }

    pub fn mode(&self) -> CorrelationMode {
        self.mode
    }

    /// Publish `command` to the device and return its reply payload, or `Timeout` when
    /// nothing usable is in the reply cache at the end of the window.
    #[instrument(skip(self), fields(mode = ?self.mode))]
    pub async fn send_and_await(&self, device_id: &DeviceId, command: &str) -> HearthResult<String> {
        let reply = match self.mode {
            CorrelationMode::FixedDelay => self.fixed_delay(device_id, command).await?,
            CorrelationMode::Waiter => self.with_waiter(device_id, command).await?,
        };
        match reply {
            Some(r) => {
                info!(target: "hearth::correlator", device_id = %device_id, command, "device replied");
                Ok(r.payload)
            }
            None => {
                info!(target: "hearth::correlator", device_id = %device_id, command, "no reply within window");
                Err(HearthError::Timeout(format!(
                    "device {} did not answer within {} ms",
                    device_id,
                    self.reply_wait.as_millis()
                )))
            }
        }
    }

    pub async fn send_kind(&self, device_id: &DeviceId, kind: CommandKind) -> HearthResult<String> {
        self.send_and_await(device_id, kind.command()).await
    }

    async fn fixed_delay(&self, device_id: &DeviceId, command: &str) -> HearthResult<Option<PendingReply>> {
        self.transport.publish_command(device_id, command).await?;
        tokio::time::sleep(self.reply_wait).await;
        Ok(self.replies.get(device_id))
    }

    async fn with_waiter(&self, device_id: &DeviceId, command: &str) -> HearthResult<Option<PendingReply>> {
        let started = Utc::now();
        let (correlation_id, rx) = self.replies.register_waiter(device_id);
        debug!(target: "hearth::correlator", device_id = %device_id, %correlation_id, "waiter registered");

        if let Err(e) = self.transport.publish_command(device_id, command).await {
            self.replies.cancel_waiter(device_id, correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(self.reply_wait, rx).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            // Timed out, or superseded by a newer call for the same device.
            _ => {
                self.replies.cancel_waiter(device_id, correlation_id);
                Ok(self
                    .replies
                    .get(device_id)
                    .filter(|r| r.arrival_time >= started))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalBroker;
    use tokio::time::Instant;

    fn correlator(mode: CorrelationMode) -> (CommandCorrelator, ReplyCache, LocalBroker) {
        let broker = LocalBroker::default();
        let replies = ReplyCache::new();
        let cfg = CorrelatorConfig {
            reply_wait_ms: 200,
            mode,
        };
        let c = CommandCorrelator::new(Arc::new(broker.clone()), replies.clone(), &cfg);
        (c, replies, broker)
    }

    #[tokio::test(start_paused = true)]
    async fn no_reply_times_out_after_the_window() {
        let (c, _replies, _broker) = correlator(CorrelationMode::FixedDelay);
        let start = Instant::now();
        let err = c.send_and_await(&DeviceId::from("dev-2"), "OTA:CK").await.unwrap_err();
        assert!(err.is_timeout());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_the_command_on_the_notify_topic() {
        let (c, _replies, broker) = correlator(CorrelationMode::FixedDelay);
        let mut bus = broker.subscribe();
        let _ = c.send_kind(&DeviceId::from("dev-3"), CommandKind::Update).await;
        let msg = bus.recv().await.unwrap();
        assert_eq!(msg.topic, "NC/dev-3");
        assert_eq!(msg.payload, "OTA:UD");
    }

    #[tokio::test(start_paused = true)]
    async fn reply_written_during_window_is_returned() {
        let (c, replies, _broker) = correlator(CorrelationMode::FixedDelay);
        let dev = DeviceId::from("dev-1");
        let writer = {
            let replies = replies.clone();
            let dev = dev.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                replies.record(PendingReply::new(dev, "1.0.7"));
            })
        };
        assert_eq!(c.send_and_await(&dev, "OTA:CK").await.unwrap(), "1.0.7");
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_is_only_seen_by_the_next_call() {
        let (c, replies, _broker) = correlator(CorrelationMode::FixedDelay);
        let dev = DeviceId::from("dev-1");
        assert!(c.send_and_await(&dev, "OTA:CK").await.is_err());

        // Arrives after the first call already read the slot.
        replies.record(PendingReply::new(dev.clone(), "late"));
        assert_eq!(c.send_and_await(&dev, "OTA:CK").await.unwrap(), "late");
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_returns_stale_reply() {
        let (c, replies, _broker) = correlator(CorrelationMode::FixedDelay);
        let dev = DeviceId::from("dev-1");
        replies.record(PendingReply::new(dev.clone(), "stale"));
        assert_eq!(c.send_and_await(&dev, "OTA:CK").await.unwrap(), "stale");
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_mode_returns_as_soon_as_the_reply_lands() {
        let (c, replies, _broker) = correlator(CorrelationMode::Waiter);
        let dev = DeviceId::from("dev-1");
        let writer = {
            let replies = replies.clone();
            let dev = dev.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                replies.record(PendingReply::new(dev, "fresh"));
            })
        };
        let start = Instant::now();
        assert_eq!(c.send_and_await(&dev, "OTA:CK").await.unwrap(), "fresh");
        assert!(start.elapsed() < Duration::from_millis(200));
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_mode_ignores_stale_reply() {
        let (c, replies, _broker) = correlator(CorrelationMode::Waiter);
        let dev = DeviceId::from("dev-1");
        let mut stale = PendingReply::new(dev.clone(), "stale");
        stale.arrival_time = Utc::now() - chrono::Duration::seconds(5);
        replies.record(stale);
        assert!(c.send_and_await(&dev, "OTA:CK").await.unwrap_err().is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_waiter_call_takes_the_next_reply_for_the_device() {
        let (c, replies, _broker) = correlator(CorrelationMode::Waiter);
        let c = Arc::new(c);
        let dev = DeviceId::from("dev-1");

        let first = {
            let c = c.clone();
            let dev = dev.clone();
            tokio::spawn(async move { c.send_and_await(&dev, "OTA:CK").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let c = c.clone();
            let dev = dev.clone();
            tokio::spawn(async move { c.send_and_await(&dev, "OTA:UD").await })
        };

        // Superseded before any reply arrived.
        assert!(first.await.unwrap().unwrap_err().is_timeout());

        // No id on the wire: the answer to `OTA:CK` still resolves the `OTA:UD` call.
        tokio::time::sleep(Duration::from_millis(10)).await;
        replies.record(PendingReply::new(dev, "OTA:INFO@1.0.3@2024-05-01@1@0"));
        assert_eq!(second.await.unwrap().unwrap(), "OTA:INFO@1.0.3@2024-05-01@1@0");
    }

    #[test]
    fn command_kinds_map_to_firmware_strings() {
        assert_eq!(CommandKind::Check.command(), "OTA:CK");
        assert_eq!(CommandKind::from_code(1), Some(CommandKind::Update));
        assert_eq!(CommandKind::from_code(5), None);
    }
}
