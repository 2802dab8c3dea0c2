//! Bounded decode worker pool.
//!
//! Every session gets a lane: an ordered queue drained by a single task, so one session's
//! chunks are decoded strictly in receipt order and never in parallel. The actual decode
//! runs on `spawn_blocking`, gated by a pool-wide semaphore that caps concurrent decode
//! work across all sessions.

use crate::stt::SpeechDecoder;
use hearth_core::{DeviceId, HearthError, HearthResult};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Clone)]
pub struct DecodePool {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl DecodePool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Opens a lane owning `decoder` for the rest of the session.
    pub fn open_lane(&self, device_id: DeviceId, decoder: Box<dyn SpeechDecoder>) -> DecodeLane {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_lane(device_id, decoder, self.permits.clone(), rx));
        DecodeLane { tx, worker }
    }
}

/// What a drained lane produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaneReport {
    pub transcript: String,
    pub chunks: usize,
    pub failures: usize,
}

pub struct DecodeLane {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    worker: JoinHandle<HearthResult<LaneReport>>,
}

impl DecodeLane {
    /// Queues a chunk without waiting for it to be decoded.
    pub fn submit(&self, chunk: Vec<u8>) -> HearthResult<()> {
        self.tx
            .send(chunk)
            .map_err(|_| HearthError::Decode("decode lane closed".to_string()))
    }

    /// Closes the queue, waits for every queued chunk, then asks the decoder for its transcript.
    pub async fn finish(self) -> HearthResult<LaneReport> {
        drop(self.tx);
        self.worker.await?
    }
}

async fn run_lane(
    device_id: DeviceId,
    mut decoder: Box<dyn SpeechDecoder>,
    permits: Arc<Semaphore>,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> HearthResult<LaneReport> {
    let mut report = LaneReport::default();

    while let Some(chunk) = rx.recv().await {
        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| HearthError::Decode(e.to_string()))?;
        let (returned, result) = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let r = decoder.process_chunk(&chunk);
            (decoder, r)
        })
        .await?;
        decoder = returned;
        report.chunks += 1;
        if let Err(e) = result {
            report.failures += 1;
            warn!(target: "hearth::voice", device_id = %device_id, error = %e, "chunk decode failed; continuing");
        }
    }

    let permit = permits
        .acquire_owned()
        .await
        .map_err(|e| HearthError::Decode(e.to_string()))?;
    let transcript = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        decoder.transcript()
    })
    .await?;

    report.transcript = match transcript {
        Ok(t) => t,
        Err(e) => {
            // Keep the session alive; an empty transcript becomes the placeholder.
            report.failures += 1;
            warn!(target: "hearth::voice", device_id = %device_id, error = %e, "transcript failed");
            String::new()
        }
    };
    Ok(report)
}
