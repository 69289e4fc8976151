//! Single writer for a connection.
//!
//! The worker and the keepalive emitter never touch the socket; they queue
//! whole frames here and this task sends them one message at a time, so
//! frames can't interleave.

use std::fmt::Display;

use axum::extract::ws::{CloseFrame, Message};
use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::ping_frame;

/// Bound on frames waiting to be written per connection
pub const OUTBOUND_QUEUE_CAPACITY: usize = 32;

#[derive(Debug)]
pub enum OutboundFrame {
    /// One complete WAV file
    Audio(Vec<u8>),
    Ping,
    Close { code: u16, reason: String },
}

impl OutboundFrame {
    fn into_message(self) -> Message {
        match self {
            OutboundFrame::Audio(wav) => Message::Binary(wav.into()),
            OutboundFrame::Ping => Message::Text(ping_frame().into()),
            OutboundFrame::Close { code, reason } => Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })),
        }
    }
}

/// Write queued frames until every producer is gone or the socket fails.
///
/// A send failure cancels `session` so the rest of the session tears down.
/// After cancellation, queued audio and pings are discarded.
pub async fn run_writer<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<OutboundFrame>,
    session: CancellationToken,
) -> u64
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut written = 0u64;
    while let Some(frame) = rx.recv().await {
        let closing = matches!(frame, OutboundFrame::Close { .. });
        // Once the session is cancelled only the close frame still goes out
        if session.is_cancelled() && !closing {
            continue;
        }
        if let Err(e) = sink.send(frame.into_message()).await {
            warn!(error = %e, "Failed to send WS message, closing session");
            session.cancel();
            return written;
        }
        written += 1;
        if closing {
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!(error = %e, "Error while closing WS sink");
    }
    written
}
