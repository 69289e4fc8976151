use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::writer::OutboundFrame;

/// Queue a ping every `period`, first one a full period after start.
/// Returns silently on cancellation or once the writer is gone.
pub async fn run_keepalive(
    outbound: mpsc::Sender<OutboundFrame>,
    period: Duration,
    cancel: CancellationToken,
) -> u64 {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let delivered = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            res = outbound.send(OutboundFrame::Ping) => res.is_ok(),
        };
        if !delivered {
            break;
        }
        sent += 1;
        trace!(sent, "Queued keepalive ping");
    }

    sent
}
