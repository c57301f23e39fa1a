//! Hub commands, relay items, and errors.
//!
//! This module defines the message types for communicating with the `HubActor`:
//! - `HubCommand`: registry mutations, answered through a oneshot
//! - `Relayed`: an already-serialized broadcast waiting on the relay
//! - `HubError` / `RelayOutcome`: what callers get back

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use carto_core::{DisconnectReason, DomainError, Scope, SessionId};
use carto_protocol::EnvelopeError;

use crate::session::{ClientSession, Frame};

// ============================================================================
// Hub Commands
// ============================================================================

/// Registry mutations sent to the hub actor.
///
/// Each command carries a oneshot channel for the response, so callers can
/// await the result without touching the registry themselves.
#[derive(Debug)]
pub enum HubCommand {
    /// Add a session in `Connecting` state and activate it.
    ///
    /// # Errors
    /// - `HubError::SessionAlreadyExists` if the id is already registered
    /// - `HubError::RegistryFull` if at maximum capacity
    /// - `HubError::SessionNotConnecting` if the session already left `Connecting`
    Register {
        session: Arc<ClientSession>,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// Remove a session if present and close its queue.
    ///
    /// Responds `true` if the session was registered, `false` otherwise.
    Unregister {
        session_id: SessionId,
        reason: DisconnectReason,
        respond_to: oneshot::Sender<bool>,
    },
}

/// A broadcast on its way from a producer to the hub loop.
#[derive(Debug, Clone)]
pub struct Relayed {
    /// The envelope, serialized once for every recipient.
    pub frame: Frame,
    /// Restrict delivery to sessions matching this scope.
    pub scope: Option<Scope>,
}

// ============================================================================
// Outcomes and Errors
// ============================================================================

/// What happened to a broadcast handed to the hub.
///
/// None of these are errors: broadcast is best-effort and never blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Accepted onto the relay; the hub loop will deliver it.
    Queued,
    /// The relay was full; the broadcast was dropped and logged.
    DroppedFull,
    /// The hub has shut down; nothing was sent.
    HubStopped,
}

/// Errors that can occur during hub operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub has shut down or is shutting down.
    #[error("hub is shut down")]
    Closed,

    /// The registry has reached its maximum session capacity.
    #[error("registry is full (max: {max} sessions)")]
    RegistryFull {
        /// Maximum number of sessions allowed
        max: usize,
    },

    /// A session with this ID is already registered.
    #[error("session already exists: {0}")]
    SessionAlreadyExists(SessionId),

    /// The session was not in `Connecting` state when registered.
    #[error("session is not connecting: {0}")]
    SessionNotConnecting(SessionId),

    /// The filtered broadcast had an empty key or value.
    #[error("invalid broadcast scope: {0}")]
    InvalidScope(#[from] DomainError),

    /// The envelope could not be built or serialized.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}
