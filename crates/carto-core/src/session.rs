//! Session identity, lifecycle state and teardown reasons.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DomainError, InterestFilter};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for one client connection.
///
/// Generated by the server at upgrade time (UUID v4); never supplied by
/// the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh random session identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns a shortened display form (first 8 characters).
    ///
    /// Useful for compact log lines.
    #[must_use]
    pub fn short(&self) -> String {
        let mut s = self.0.simple().to_string();
        s.truncate(8);
        s
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| DomainError::InvalidSessionId {
                value: s.to_string(),
            })
    }
}

// ============================================================================
// Lifecycle State
// ============================================================================

/// Session lifecycle: `Connecting → Active → Closing → Closed`.
///
/// Transitions only move forward. The `u8` representation lets the daemon
/// keep the state in an atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    /// Upgraded but not yet registered with the hub.
    Connecting = 0,
    /// Registered; pumps running.
    Active = 1,
    /// A teardown trigger fired; queue closed, pumps winding down.
    Closing = 2,
    /// Writer finished and transport released.
    Closed = 3,
}

impl SessionState {
    /// Returns the raw discriminant.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// True once teardown has started.
    pub const fn is_terminating(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl TryFrom<u8> for SessionState {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Connecting),
            1 => Ok(Self::Active),
            2 => Ok(Self::Closing),
            3 => Ok(Self::Closed),
            other => Err(DomainError::InvalidState(other)),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Disconnect Reasons
// ============================================================================

/// Why a session left the `Active` state.
///
/// Several triggers can race; the first one recorded wins and every later
/// trigger is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The client sent a close frame or ended the stream.
    ClientClosed,
    /// Reading from the transport failed.
    ReadError,
    /// Writing to the transport failed.
    WriteError,
    /// A single write exceeded the per-write deadline.
    WriteTimeout,
    /// The outbound queue was full when the hub tried to deliver.
    SlowConsumer,
    /// No pong arrived within the liveness window.
    LivenessTimeout,
    /// The hub is shutting down.
    HubShutdown,
    /// Removed through an explicit unregister call.
    Unregistered,
    /// The hub refused to register the session.
    Rejected,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ClientClosed => "client closed",
            Self::ReadError => "read error",
            Self::WriteError => "write error",
            Self::WriteTimeout => "write timeout",
            Self::SlowConsumer => "slow consumer",
            Self::LivenessTimeout => "liveness timeout",
            Self::HubShutdown => "hub shutdown",
            Self::Unregistered => "unregistered",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Read-Only View
// ============================================================================

/// Snapshot of a live session, safe to hand out of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub filter: InterestFilter,
    pub state: SessionState,
    pub connected_at: DateTime<Utc>,
}
