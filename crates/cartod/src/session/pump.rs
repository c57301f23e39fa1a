//! The two long-lived activities of a session.
//!
//! Both pumps are generic over the transport halves so they can be driven
//! by an axum `WebSocket` split in production and by in-memory channels in
//! tests.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use carto_core::DisconnectReason;
use carto_protocol::{Envelope, INVALID_MESSAGE};

use super::{ClientSession, Frame, Inbound};
use crate::config::SessionConfig;

// ============================================================================
// Inbound Pump
// ============================================================================

/// Reads frames until the transport fails, the client leaves, the liveness
/// deadline passes, or the session is closed from elsewhere.
///
/// Returns the reason the pump stopped. It does not close the session
/// itself; the caller folds the reason into the teardown.
pub async fn read_pump<S, E>(
    session: &ClientSession,
    mut stream: S,
    pong_wait: Duration,
) -> DisconnectReason
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let deadline = sleep(pong_wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;

            _ = session.closed() => {
                return session.close_reason().unwrap_or(DisconnectReason::Unregistered);
            }

            _ = &mut deadline => {
                warn!(session_id = %session.id(), "No pong within liveness window");
                return DisconnectReason::LivenessTimeout;
            }

            next = stream.next() => {
                let message = match next {
                    None => return DisconnectReason::ClientClosed,
                    Some(Err(e)) => {
                        debug!(session_id = %session.id(), error = %e, "Transport read failed");
                        return DisconnectReason::ReadError;
                    }
                    Some(Ok(message)) => message,
                };

                let inbound = match message {
                    Message::Text(text) => session.handle_text(text.as_str()),
                    Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                        Ok(text) => session.handle_text(text),
                        Err(_) => {
                            session.reply(&Envelope::error(
                                INVALID_MESSAGE,
                                "Invalid message format",
                                Some("binary frame is not valid UTF-8".to_string()),
                            ));
                            Inbound::Handled
                        }
                    },
                    Message::Pong(_) => Inbound::Pong,
                    // The transport answers control pings on its own.
                    Message::Ping(_) => Inbound::Handled,
                    Message::Close(frame) => {
                        debug!(
                            session_id = %session.id(),
                            code = frame.as_ref().map(|f| f.code),
                            "Client sent close"
                        );
                        return DisconnectReason::ClientClosed;
                    }
                };

                if inbound == Inbound::Pong {
                    deadline.as_mut().reset(Instant::now() + pong_wait);
                }
            }
        }
    }
}

// ============================================================================
// Outbound Pump
// ============================================================================

/// Drains the outbound queue to the transport and emits liveness pings.
///
/// Exits when the queue closes (after draining it and sending a close
/// frame) or on the first failed write, in which case the session is
/// closed with `WriteError` or `WriteTimeout`. Always leaves the session
/// in `Closed` state.
pub async fn write_pump<W>(
    session: Arc<ClientSession>,
    mut sink: W,
    mut queue: mpsc::Receiver<Frame>,
    config: SessionConfig,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let write_timeout = config.write_timeout();
    let ping_period = config.ping_period();
    let mut ticker = interval_at(Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let failure = loop {
        tokio::select! {
            frame = queue.recv() => match frame {
                Some(first) => {
                    let text = coalesce(first, &mut queue, config.max_coalesce);
                    let message = Message::Text(text.into());
                    if let Err(reason) = write_frame(&mut sink, message, write_timeout).await {
                        break Some(reason);
                    }
                }
                None => break None,
            },

            _ = ticker.tick() => {
                let ping = Message::Ping(Bytes::new());
                if let Err(reason) = write_frame(&mut sink, ping, write_timeout).await {
                    break Some(reason);
                }
            }
        }
    };

    match failure {
        Some(reason) => {
            session.close(reason);
        }
        None => {
            let reason = session.close_reason().unwrap_or(DisconnectReason::Unregistered);
            let close = Message::Close(Some(CloseFrame {
                code: close_code_for(reason),
                reason: reason.to_string().into(),
            }));
            // Best effort: the peer may already be gone.
            let _ = write_frame(&mut sink, close, write_timeout).await;
            let _ = timeout(write_timeout, sink.close()).await;
        }
    }

    session.mark_closed();
    debug!(
        session_id = %session.id(),
        reason = ?session.close_reason(),
        "Writer stopped"
    );
}

/// Merges the first frame with whatever is already queued, newline
/// separated, up to `max` frames.
fn coalesce(first: Frame, queue: &mut mpsc::Receiver<Frame>, max: usize) -> String {
    let mut text = String::from(&*first);
    let mut merged = 1;
    while merged < max {
        match queue.try_recv() {
            Ok(next) => {
                text.push('\n');
                text.push_str(&next);
                merged += 1;
            }
            Err(_) => break,
        }
    }
    text
}

/// Writes one message under the per-write deadline.
async fn write_frame<W>(
    sink: &mut W,
    message: Message,
    deadline: Duration,
) -> Result<(), DisconnectReason>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "Transport write failed");
            Err(DisconnectReason::WriteError)
        }
        Err(_) => {
            warn!(timeout_ms = deadline.as_millis() as u64, "Transport write timed out");
            Err(DisconnectReason::WriteTimeout)
        }
    }
}

fn close_code_for(reason: DisconnectReason) -> u16 {
    match reason {
        DisconnectReason::HubShutdown => close_code::AWAY,
        DisconnectReason::SlowConsumer => close_code::AGAIN,
        DisconnectReason::LivenessTimeout => close_code::POLICY,
        _ => close_code::NORMAL,
    }
}
