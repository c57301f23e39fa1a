//! Carto Protocol - Wire contract for the sync hub
//!
//! Every frame exchanged over a sync session is an [`Envelope`]:
//!
//! ```text
//! {"type": <kind>, "timestamp": <RFC3339>, "data"?: <kind-specific>, "error"?: <string>}
//! ```
//!
//! The set of kinds is closed ([`EventKind`]) and each kind has exactly one
//! payload shape ([`Event`]). Envelopes are only built through the
//! kind-specific constructors, so a `task.updated` envelope always carries a
//! [`TaskEvent`].

pub mod envelope;
pub mod event;
pub mod kind;
pub mod parse;

pub use envelope::{Envelope, EnvelopeError};
pub use event::{Action, BoardEvent, Changes, ErrorEvent, Event, ProjectEvent, TaskEvent};
pub use kind::EventKind;
pub use parse::{parse_client_frame, ClientFrame, ProtocolError, INVALID_MESSAGE};
