//! Per-connection session coordinator.
//!
//! Each `/tts-stream` connection gets three tasks tied together by one
//! cancellation token:
//!
//! - the **worker**, draining the session queue through the synthesis gateway
//! - the **keepalive** emitter, queueing pings on a timer
//! - the **writer**, the only task that writes to the socket
//!
//! The coordinator itself runs the receive loop, pushes parsed requests onto
//! the unbounded session queue and tears everything down when the loop ends.

pub mod keepalive;
pub mod worker;
pub mod writer;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, Message, WebSocket};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use tts_core::SynthesisGateway;
use uuid::Uuid;

use crate::config::SessionSettings;
use crate::error::SessionError;
use crate::metrics::SessionMetrics;
use crate::protocol::{FrameParser, Inbound};

use self::worker::{QueuedRequest, WorkerStats};
use self::writer::{OutboundFrame, OUTBOUND_QUEUE_CAPACITY};

/// How long teardown waits for the writer to flush before aborting it
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Draining,
    Closed,
}

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub state: SessionState,
    /// Requests accepted onto the queue so far
    pub received: u64,
    /// Plain-text requests refused before reaching the queue
    pub rejected: u64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Active,
            received: 0,
            rejected: 0,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one WebSocket connection to completion
pub async fn handle_socket(
    socket: WebSocket,
    gateway: SynthesisGateway,
    settings: Arc<SessionSettings>,
    metrics: Arc<SessionMetrics>,
) {
    let session = Session::new();
    let span = info_span!("session", session_id = %session.id);
    run_session(session, socket, gateway, settings, metrics)
        .instrument(span)
        .await;
}

async fn run_session(
    mut session: Session,
    socket: WebSocket,
    gateway: SynthesisGateway,
    settings: Arc<SessionSettings>,
    metrics: Arc<SessionMetrics>,
) {
    info!(protocol = ?settings.protocol, "WebSocket connection established");
    let _guard = metrics.session_opened();

    let (sink, mut stream) = socket.split();
    let cancel = CancellationToken::new();
    let (out_tx, out_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_QUEUE_CAPACITY);
    let (queue_tx, queue_rx) = mpsc::unbounded_channel::<QueuedRequest>();

    let mut writer_task =
        tokio::spawn(writer::run_writer(sink, out_rx, cancel.clone()).in_current_span());
    let worker_task = tokio::spawn(
        worker::run_worker(
            queue_rx,
            gateway,
            out_tx.clone(),
            settings.wav_encoding,
            Arc::clone(&metrics),
            cancel.clone(),
        )
        .in_current_span(),
    );
    let keepalive_task = tokio::spawn(
        keepalive::run_keepalive(out_tx.clone(), settings.keepalive_interval, cancel.clone())
            .in_current_span(),
    );

    let mut parser = FrameParser::new(&settings);
    let reason = receive_loop(&mut stream, &mut parser, &queue_tx, &cancel, &mut session, &metrics).await;

    if parser.awaiting_voice() {
        debug!("Session ended between a request header and its voice reference");
    }
    match &reason {
        SessionError::ConnectionClosed => info!("Client disconnected"),
        SessionError::ConnectionLost(e) => warn!(error = %e, "Connection lost"),
        SessionError::Protocol(e) => warn!(error = %e, "Protocol error, closing session"),
    }

    // Teardown
    session.state = SessionState::Draining;
    info!("Closing background tasks...");
    cancel.cancel();
    drop(queue_tx);

    if let SessionError::Protocol(e) = &reason {
        let close = OutboundFrame::Close {
            code: close_code::POLICY,
            reason: e.to_string(),
        };
        queue_close(&out_tx, close, WRITER_DRAIN_TIMEOUT).await;
    }
    drop(out_tx);

    let stats = match worker_task.await {
        Ok(stats) => stats,
        Err(e) => {
            warn!(error = %e, "Worker task ended abnormally");
            WorkerStats::default()
        }
    };
    if let Err(e) = keepalive_task.await {
        warn!(error = %e, "Keepalive task ended abnormally");
    }
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(error = %e, "Writer task ended abnormally"),
        Err(_) => {
            warn!("Writer did not drain in time, aborting");
            writer_task.abort();
        }
    }

    session.state = SessionState::Closed;
    info!(
        received = session.received,
        rejected = session.rejected,
        completed = stats.completed,
        failed = stats.failed,
        dropped = session.received.saturating_sub(stats.completed + stats.failed),
        "Connection and tasks closed"
    );
}

/// Queue a close frame for the writer, giving up after `within`.
/// The writer may be stuck behind a client that stopped reading.
async fn queue_close(
    outbound: &mpsc::Sender<OutboundFrame>,
    close: OutboundFrame,
    within: Duration,
) -> bool {
    match tokio::time::timeout(within, outbound.send(close)).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => {
            debug!("Writer already gone, close frame not sent");
            false
        }
        Err(_) => {
            warn!("Outbound queue stayed full, close frame not sent");
            false
        }
    }
}

/// Read frames until the connection ends or the protocol breaks.
/// Returns the reason the session has to end.
async fn receive_loop<R>(
    stream: &mut R,
    parser: &mut FrameParser,
    queue: &mpsc::UnboundedSender<QueuedRequest>,
    cancel: &CancellationToken,
    session: &mut Session,
    metrics: &SessionMetrics,
) -> SessionError
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            // Writer failed: the client is gone
            _ = cancel.cancelled() => return SessionError::ConnectionClosed,
            next = stream.next() => next,
        };

        let msg = match next {
            None => return SessionError::ConnectionClosed,
            Some(Err(e)) => return SessionError::ConnectionLost(e),
            Some(Ok(msg)) => msg,
        };

        match parser.parse(msg) {
            Ok(Inbound::Request(request)) => {
                session.received += 1;
                metrics.request_received();
                let seq = session.received;
                info!(
                    seq,
                    chars = request.text.len(),
                    language = %request.language,
                    "Received text, adding to queue"
                );
                if queue.send(QueuedRequest { seq, request }).is_err() {
                    // Worker is gone, nothing left to serve this session
                    return SessionError::ConnectionClosed;
                }
            }
            Ok(Inbound::Rejected(reason)) => {
                session.rejected += 1;
                metrics.request_received();
                metrics.request_failed();
                warn!(reason = %reason, "Rejected text request, skipping it");
            }
            Ok(Inbound::AwaitingVoice) => debug!("Header received, awaiting voice reference"),
            Ok(Inbound::Ignored) => {}
            Ok(Inbound::Closed) => return SessionError::ConnectionClosed,
            Err(e) => return SessionError::Protocol(e),
        }
    }
}
