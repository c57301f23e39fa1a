//! Carto Core - Shared types for the Cartographer sync hub
//!
//! This crate provides the domain vocabulary shared between the wire
//! protocol (`carto-protocol`) and the daemon (`cartod`): session
//! identity, lifecycle state, interest filters and disconnect reasons.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod filter;
pub mod session;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use filter::{InterestFilter, Scope, BOARD_ID, PROJECT_ID};
pub use session::{DisconnectReason, SessionId, SessionInfo, SessionState};
