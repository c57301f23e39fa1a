//! Client sessions: one per upgraded WebSocket connection.
//!
//! A session is shared (`Arc`) between three parties that never touch each
//! other's private state:
//!
//! ```text
//!                 try_enqueue (non-blocking)
//!   HubActor ───────────────────────────┐
//!                                       ▼
//!   read_pump ── pong/error ──▶ OutboundQueue ──▶ write_pump ──▶ transport
//!       │                                              ▲
//!       └────────── close(reason) / closed() ──────────┘
//! ```
//!
//! Teardown is idempotent: the first `close(reason)` records the reason,
//! closes the queue and cancels the session token; later calls are no-ops.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Queue operations never block and never panic on a closed channel

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

use carto_core::{DisconnectReason, InterestFilter, SessionId, SessionInfo, SessionState};
use carto_protocol::{parse_client_frame, ClientFrame, Envelope, INVALID_MESSAGE};

mod pump;

pub use pump::{read_pump, write_pump};

/// A serialized envelope, shared between every queue it is delivered to.
pub type Frame = Arc<str>;

// ============================================================================
// Outbound Queue
// ============================================================================

/// Why a frame could not be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue is at capacity.
    #[error("outbound queue is full")]
    Full,

    /// The queue has been closed; it accepts nothing further.
    #[error("outbound queue is closed")]
    Closed,
}

/// Bounded, closable, non-blocking producer side of a session's queue.
///
/// Closing drops the only sender, so the writer drains what is already
/// queued and then observes end-of-stream.
#[derive(Debug)]
pub struct OutboundQueue {
    sender: Mutex<Option<mpsc::Sender<Frame>>>,
}

impl OutboundQueue {
    /// Creates a queue and its consumer end.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Enqueues without waiting.
    pub fn try_enqueue(&self, frame: Frame) -> Result<(), EnqueueError> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Closes the queue. Returns true if this call closed it.
    pub fn close(&self) -> bool {
        self.sender.lock().take().is_some()
    }
}

// ============================================================================
// Client Session
// ============================================================================

/// What an inbound text frame meant for liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// The frame was handled; the liveness deadline is unchanged.
    Handled,
    /// The frame was a pong; the liveness deadline should be extended.
    Pong,
}

/// One logical client connection.
#[derive(Debug)]
pub struct ClientSession {
    id: SessionId,
    filter: InterestFilter,
    connected_at: DateTime<Utc>,
    queue: OutboundQueue,
    state: AtomicU8,
    close_reason: OnceLock<DisconnectReason>,
    closed: CancellationToken,
}

impl ClientSession {
    /// Creates a session in `Connecting` state with a fresh identity.
    ///
    /// Returns the shared session and the consumer end of its outbound
    /// queue, which belongs to the writer.
    pub fn new(
        filter: InterestFilter,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        Self::with_id(SessionId::new(), filter, queue_capacity)
    }

    /// Like [`new`](Self::new) with a caller-chosen identity.
    pub fn with_id(
        id: SessionId,
        filter: InterestFilter,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (queue, rx) = OutboundQueue::new(queue_capacity);
        let session = Arc::new(Self {
            id,
            filter,
            connected_at: Utc::now(),
            queue,
            state: AtomicU8::new(SessionState::Connecting.as_u8()),
            close_reason: OnceLock::new(),
            closed: CancellationToken::new(),
        });
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn filter(&self) -> &InterestFilter {
        &self.filter
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> SessionState {
        SessionState::try_from(self.state.load(Ordering::Acquire)).unwrap_or(SessionState::Closed)
    }

    /// `Connecting → Active`. Returns false if the session was not connecting.
    pub fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connecting.as_u8(),
                SessionState::Active.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Starts teardown. The first caller's reason wins.
    ///
    /// Moves the session to `Closing`, closes the outbound queue and wakes
    /// both pumps. Returns true if this call started the teardown.
    pub fn close(&self, reason: DisconnectReason) -> bool {
        if self.close_reason.set(reason).is_err() {
            return false;
        }
        self.state
            .fetch_max(SessionState::Closing.as_u8(), Ordering::AcqRel);
        self.queue.close();
        self.closed.cancel();
        debug!(session_id = %self.id, reason = %reason, "Session closing");
        true
    }

    /// Marks the transport as released.
    pub fn mark_closed(&self) {
        self.state
            .store(SessionState::Closed.as_u8(), Ordering::Release);
    }

    /// Reason recorded by the first `close`, if any.
    pub fn close_reason(&self) -> Option<DisconnectReason> {
        self.close_reason.get().copied()
    }

    pub fn is_closing(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once teardown has started.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Non-blocking enqueue onto this session's outbound queue.
    pub fn enqueue(&self, frame: Frame) -> Result<(), EnqueueError> {
        self.queue.try_enqueue(frame)
    }

    /// Encodes and enqueues an envelope addressed only to this session.
    ///
    /// Used for replies (pong, error). Failures are logged and dropped.
    pub fn reply(&self, envelope: &Envelope) {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Failed to encode reply");
                return;
            }
        };
        if let Err(e) = self.enqueue(Frame::from(text)) {
            debug!(
                session_id = %self.id,
                kind = %envelope.kind(),
                error = %e,
                "Reply dropped"
            );
        }
    }

    /// Handles one inbound text frame.
    ///
    /// - `ping` enqueues exactly one pong
    /// - `pong` asks the reader to extend the liveness deadline
    /// - malformed frames get an `INVALID_MESSAGE` error reply
    /// - anything else is logged and ignored
    pub fn handle_text(&self, text: &str) -> Inbound {
        match parse_client_frame(text) {
            Ok(ClientFrame::Ping) => {
                self.reply(&Envelope::pong());
                Inbound::Handled
            }
            Ok(ClientFrame::Pong) => Inbound::Pong,
            Ok(ClientFrame::Other(kind)) => {
                debug!(session_id = %self.id, kind = %kind, "Ignoring client-sent event");
                Inbound::Handled
            }
            Ok(ClientFrame::Unknown(kind)) => {
                debug!(session_id = %self.id, kind = %kind, "Ignoring unknown message kind");
                Inbound::Handled
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Invalid inbound message");
                self.reply(&Envelope::error(
                    INVALID_MESSAGE,
                    "Invalid message format",
                    Some(e.to_string()),
                ));
                Inbound::Handled
            }
        }
    }

    /// Read-only snapshot for callers outside the hub.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            filter: self.filter.clone(),
            state: self.state(),
            connected_at: self.connected_at,
        }
    }
}
