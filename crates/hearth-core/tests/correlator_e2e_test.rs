//! End-to-end: correlator → LocalBroker → simulated device → delivery loop → reply cache.

use hearth_core::{
    CommandCorrelator, CommandKind, CorrelationMode, CorrelatorConfig, DeliveryRouter, DeviceId,
    LocalBroker, ReplyCache, VoiceFlagStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Spawns a fake device that answers `OTA:CK` on its own `NC/` topic after `delay`,
/// the way the firmware does.
fn spawn_device(broker: &LocalBroker, id: &'static str, delay: Duration) -> tokio::task::JoinHandle<()> {
    let mut bus = broker.subscribe();
    let broker = broker.clone();
    tokio::spawn(async move {
        let inbox = format!("NC/{}", id);
        while let Ok(msg) = bus.recv().await {
            if msg.topic == inbox && msg.payload == "OTA:CK" {
                tokio::time::sleep(delay).await;
                broker.inject(inbox.clone(), "OTA:INFO@2.1.0@2024-05-01@1@0");
            }
        }
    })
}

fn setup(mode: CorrelationMode) -> (LocalBroker, CommandCorrelator) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let broker = LocalBroker::default();
    let replies = ReplyCache::new();
    let router = DeliveryRouter::new(replies.clone(), VoiceFlagStore::new());
    broker.spawn_delivery(router);
    let cfg = CorrelatorConfig {
        reply_wait_ms: 200,
        mode,
    };
    let correlator = CommandCorrelator::new(Arc::new(broker.clone()), replies, &cfg);
    (broker, correlator)
}

#[tokio::test(start_paused = true)]
async fn device_reply_round_trips_through_the_bus() {
    let (broker, correlator) = setup(CorrelationMode::FixedDelay);
    let _device = spawn_device(&broker, "dev-1", Duration::from_millis(30));

    let payload = correlator
        .send_kind(&DeviceId::from("dev-1"), CommandKind::Check)
        .await
        .expect("device should answer inside the window");
    assert_eq!(payload, "OTA:INFO@2.1.0@2024-05-01@1@0");
}

#[tokio::test(start_paused = true)]
async fn waiter_is_resolved_by_the_device_not_by_our_own_echo() {
    let (broker, correlator) = setup(CorrelationMode::Waiter);
    let _device = spawn_device(&broker, "dev-1", Duration::from_millis(30));

    let start = Instant::now();
    let payload = correlator
        .send_kind(&DeviceId::from("dev-1"), CommandKind::Check)
        .await
        .expect("device should answer inside the window");
    assert_eq!(payload, "OTA:INFO@2.1.0@2024-05-01@1@0");
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert!(start.elapsed() < Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn silent_device_yields_no_data_after_the_window() {
    let (_broker, correlator) = setup(CorrelationMode::FixedDelay);
    let start = Instant::now();
    let err = correlator
        .send_and_await(&DeviceId::from("dev-2"), "OTA:CK")
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn slow_device_answer_is_picked_up_by_the_next_call() {
    let (broker, correlator) = setup(CorrelationMode::FixedDelay);
    let _device = spawn_device(&broker, "dev-3", Duration::from_millis(400));
    let dev = DeviceId::from("dev-3");

    assert!(correlator.send_and_await(&dev, "OTA:CK").await.is_err());
    tokio::time::sleep(Duration::from_millis(300)).await;
    // The first call's late answer is sitting in the slot.
    assert!(correlator.send_and_await(&dev, "OTA:CK").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn waiter_mode_does_not_reuse_previous_answers() {
    let (broker, correlator) = setup(CorrelationMode::Waiter);
    let _device = spawn_device(&broker, "dev-4", Duration::from_millis(400));
    let dev = DeviceId::from("dev-4");

    assert!(correlator.send_and_await(&dev, "OTA:CK").await.is_err());
    tokio::time::sleep(Duration::from_millis(300)).await;
    // The late answer to call one is older than call two, and call two's own answer is late too.
    assert!(correlator.send_and_await(&dev, "OTA:CK").await.is_err());
}
