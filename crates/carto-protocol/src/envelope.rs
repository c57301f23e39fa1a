//! The outer wire message wrapping a typed event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::event::{Action, BoardEvent, Changes, ErrorEvent, Event, ProjectEvent, TaskEvent};
use crate::EventKind;

// ============================================================================
// Envelope Errors
// ============================================================================

/// Errors building, encoding or decoding an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The entity snapshot or payload could not be serialized.
    #[error("failed to serialize {kind} payload: {source}")]
    Serialize {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },

    /// The envelope JSON itself was not valid.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The payload did not match the shape required by the kind.
    #[error("payload does not match {kind}: {source}")]
    PayloadMismatch {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// Envelope
// ============================================================================

/// `{"type", "timestamp", "data"?, "error"?}`.
///
/// Fields are private: build envelopes with the kind-specific constructors
/// or [`Envelope::from_event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    kind: EventKind,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Envelope {
    /// Wraps a typed event, stamping it with the current time.
    pub fn from_event(event: Event) -> Result<Self, EnvelopeError> {
        let kind = event.kind();
        let data = event
            .payload()
            .map_err(|source| EnvelopeError::Serialize { kind, source })?;
        let error = match &event {
            Event::Error(e) => Some(e.message.clone()),
            _ => None,
        };
        Ok(Self {
            kind,
            timestamp: Utc::now(),
            data,
            error,
        })
    }

    /// Parses an envelope from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(text).map_err(EnvelopeError::Malformed)
    }

    /// Encodes the envelope as JSON text.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(|source| EnvelopeError::Serialize {
            kind: self.kind,
            source,
        })
    }

    /// Recovers the typed event, checking that `data` matches `type`.
    pub fn decode(&self) -> Result<Event, EnvelopeError> {
        Event::from_payload(self.kind, self.data.as_ref()).map_err(|source| {
            EnvelopeError::PayloadMismatch {
                kind: self.kind,
                source,
            }
        })
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// The human-readable message of an `error` envelope.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    // ------------------------------------------------------------------------
    // Kind-specific constructors
    // ------------------------------------------------------------------------

    /// `task.created` with the full task snapshot.
    pub fn task_created<T: Serialize + ?Sized>(
        task_id: impl Into<String>,
        board_id: impl Into<String>,
        task: &T,
    ) -> Result<Self, EnvelopeError> {
        let task = snapshot(EventKind::TaskCreated, task)?;
        Self::from_event(Event::TaskCreated(TaskEvent {
            task_id: task_id.into(),
            board_id: board_id.into(),
            action: Action::Created,
            changes: None,
            task,
        }))
    }

    /// `task.updated` with the field delta and the full task snapshot.
    pub fn task_updated<T: Serialize + ?Sized>(
        task_id: impl Into<String>,
        board_id: impl Into<String>,
        changes: Changes,
        task: &T,
    ) -> Result<Self, EnvelopeError> {
        let task = snapshot(EventKind::TaskUpdated, task)?;
        Self::from_event(Event::TaskUpdated(TaskEvent {
            task_id: task_id.into(),
            board_id: board_id.into(),
            action: Action::Updated,
            changes: Some(changes),
            task,
        }))
    }

    /// `task.deleted`, ids only.
    pub fn task_deleted(
        task_id: impl Into<String>,
        board_id: impl Into<String>,
    ) -> Result<Self, EnvelopeError> {
        Self::from_event(Event::TaskDeleted(TaskEvent {
            task_id: task_id.into(),
            board_id: board_id.into(),
            action: Action::Deleted,
            changes: None,
            task: None,
        }))
    }

    /// `project.created` with the full project snapshot.
    pub fn project_created<T: Serialize + ?Sized>(
        project_id: impl Into<String>,
        project: &T,
    ) -> Result<Self, EnvelopeError> {
        let project = snapshot(EventKind::ProjectCreated, project)?;
        Self::from_event(Event::ProjectCreated(ProjectEvent {
            project_id: project_id.into(),
            action: Action::Created,
            changes: None,
            project,
        }))
    }

    /// `project.updated` with the field delta and the full project snapshot.
    pub fn project_updated<T: Serialize + ?Sized>(
        project_id: impl Into<String>,
        changes: Changes,
        project: &T,
    ) -> Result<Self, EnvelopeError> {
        let project = snapshot(EventKind::ProjectUpdated, project)?;
        Self::from_event(Event::ProjectUpdated(ProjectEvent {
            project_id: project_id.into(),
            action: Action::Updated,
            changes: Some(changes),
            project,
        }))
    }

    /// `board.updated` with the field delta and the full board snapshot.
    pub fn board_updated<T: Serialize + ?Sized>(
        board_id: impl Into<String>,
        project_id: impl Into<String>,
        changes: Changes,
        board: &T,
    ) -> Result<Self, EnvelopeError> {
        let board = snapshot(EventKind::BoardUpdated, board)?;
        Self::from_event(Event::BoardUpdated(BoardEvent {
            board_id: board_id.into(),
            project_id: project_id.into(),
            action: Action::Updated,
            changes: Some(changes),
            board,
        }))
    }

    /// Liveness probe.
    pub fn ping() -> Self {
        Self::bare(EventKind::Ping)
    }

    /// Liveness reply.
    pub fn pong() -> Self {
        Self::bare(EventKind::Pong)
    }

    /// `error` with `{code, message, details?}` in `data` and the message
    /// mirrored in `error`.
    pub fn error(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        let event = ErrorEvent {
            code: code.into(),
            message: message.into(),
            details,
        };
        // ErrorEvent is plain strings; serializing it cannot fail.
        let data = serde_json::to_value(&event).ok();
        Self {
            kind: EventKind::Error,
            timestamp: Utc::now(),
            data,
            error: Some(event.message),
        }
    }

    fn bare(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data: None,
            error: None,
        }
    }
}

/// Serializes an entity snapshot. A `null` snapshot is left off the wire.
fn snapshot<T: Serialize + ?Sized>(
    kind: EventKind,
    entity: &T,
) -> Result<Option<Value>, EnvelopeError> {
    match serde_json::to_value(entity) {
        Ok(Value::Null) => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(source) => Err(EnvelopeError::Serialize { kind, source }),
    }
}
