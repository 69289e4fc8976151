use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tts_core::{encode_wav, SynthesisGateway, SynthesisRequest, WavEncoding};

use super::writer::OutboundFrame;
use crate::metrics::SessionMetrics;

/// A request as it sits in the session queue
#[derive(Debug)]
pub struct QueuedRequest {
    /// Arrival order within the session, starting at 1
    pub seq: u64,
    pub request: SynthesisRequest,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
}

/// Drain the session queue one request at a time.
///
/// A failed request is logged and skipped. Once `cancel` fires, queued
/// requests are dropped unanswered. A synthesis that already reached the model
/// runs to completion (its staged voice file must be cleaned up) but its audio
/// is discarded.
pub async fn run_worker(
    mut queue: mpsc::UnboundedReceiver<QueuedRequest>,
    gateway: SynthesisGateway,
    outbound: mpsc::Sender<OutboundFrame>,
    encoding: WavEncoding,
    metrics: Arc<SessionMetrics>,
    cancel: CancellationToken,
) -> WorkerStats {
    let mut stats = WorkerStats::default();

    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = queue.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let QueuedRequest { seq, request } = item;

        info!(seq, chars = request.text.len(), "Worker processing request");

        // Waiting for the model is cancellable, running it is not
        let slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            slot = gateway.reserve() => slot,
        };
        let outcome = match slot {
            Ok(slot) => slot.run(request).await,
            Err(e) => Err(e),
        };

        if cancel.is_cancelled() {
            debug!(seq, "Session closed during synthesis, dropping result");
            break;
        }

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                error!(seq, error = %e, "An error occurred in TTS worker, skipping request");
                stats.failed += 1;
                metrics.request_failed();
                continue;
            }
        };

        let wav = match encode_wav(&result.samples, result.sample_rate, encoding) {
            Ok(wav) => wav,
            Err(e) => {
                error!(seq, error = %e, "WAV encoding failed, skipping request");
                stats.failed += 1;
                metrics.request_failed();
                continue;
            }
        };

        debug!(
            seq,
            bytes = wav.len(),
            duration_ms = result.duration_ms(),
            "Synthesis finished, sending audio"
        );
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = outbound.send(OutboundFrame::Audio(wav)) => sent.is_ok(),
        };
        if !sent {
            break;
        }
        stats.completed += 1;
        metrics.request_completed();
    }

    stats
}
