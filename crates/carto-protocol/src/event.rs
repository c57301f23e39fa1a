//! Typed event payloads carried in the envelope's `data` field.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::EventKind;

/// Field-level delta of an update: field name → new value.
pub type Changes = serde_json::Map<String, Value>;

/// Verb describing what happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Payload of `task.*` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub board_id: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Changes>,
    /// Full task snapshot for created/updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Value>,
}

/// Payload of `project.*` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEvent {
    pub project_id: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Changes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Value>,
}

/// Payload of `board.*` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardEvent {
    pub board_id: String,
    pub project_id: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Changes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<Value>,
}

/// Payload of `error` envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Closed union of every kind paired with its payload.
///
/// This is the only way to feed an [`Envelope`](crate::Envelope), which
/// keeps `type` and `data` consistent.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TaskCreated(TaskEvent),
    TaskUpdated(TaskEvent),
    TaskDeleted(TaskEvent),
    ProjectCreated(ProjectEvent),
    ProjectUpdated(ProjectEvent),
    BoardUpdated(BoardEvent),
    Ping,
    Pong,
    Error(ErrorEvent),
}

impl Event {
    /// The envelope kind this event is sent as.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TaskCreated(_) => EventKind::TaskCreated,
            Self::TaskUpdated(_) => EventKind::TaskUpdated,
            Self::TaskDeleted(_) => EventKind::TaskDeleted,
            Self::ProjectCreated(_) => EventKind::ProjectCreated,
            Self::ProjectUpdated(_) => EventKind::ProjectUpdated,
            Self::BoardUpdated(_) => EventKind::BoardUpdated,
            Self::Ping => EventKind::Ping,
            Self::Pong => EventKind::Pong,
            Self::Error(_) => EventKind::Error,
        }
    }

    /// Serializes the payload, or `None` for payload-less kinds.
    pub(crate) fn payload(&self) -> serde_json::Result<Option<Value>> {
        let value = match self {
            Self::TaskCreated(e) | Self::TaskUpdated(e) | Self::TaskDeleted(e) => {
                serde_json::to_value(e)?
            }
            Self::ProjectCreated(e) | Self::ProjectUpdated(e) => serde_json::to_value(e)?,
            Self::BoardUpdated(e) => serde_json::to_value(e)?,
            Self::Error(e) => serde_json::to_value(e)?,
            Self::Ping | Self::Pong => return Ok(None),
        };
        Ok(Some(value))
    }

    /// Rebuilds an event from a kind and its raw payload.
    pub(crate) fn from_payload(kind: EventKind, data: Option<&Value>) -> serde_json::Result<Self> {
        fn typed<T: serde::de::DeserializeOwned>(data: Option<&Value>) -> serde_json::Result<T> {
            T::deserialize(data.unwrap_or(&Value::Null))
        }

        Ok(match kind {
            EventKind::TaskCreated => Self::TaskCreated(typed(data)?),
            EventKind::TaskUpdated => Self::TaskUpdated(typed(data)?),
            EventKind::TaskDeleted => Self::TaskDeleted(typed(data)?),
            EventKind::ProjectCreated => Self::ProjectCreated(typed(data)?),
            EventKind::ProjectUpdated => Self::ProjectUpdated(typed(data)?),
            EventKind::BoardUpdated => Self::BoardUpdated(typed(data)?),
            EventKind::Ping => Self::Ping,
            EventKind::Pong => Self::Pong,
            EventKind::Error => Self::Error(typed(data)?),
        })
    }
}
