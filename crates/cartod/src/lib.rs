//! Cartographer sync daemon - real-time fan-out of board changes
//!
//! This crate provides the synchronization subsystem:
//! - `hub` - connection registry actor; register/unregister/broadcast
//! - `session` - per-connection state, bounded outbound queue, reader/writer pumps
//! - `server` - axum router, WebSocket upgrade handler, health check
//! - `config` - TOML/environment configuration
//! - `cli` - `cartod [serve]|config`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          cartod daemon                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌─────────────────┐  register    ┌─────────────────────────┐   │
//! │  │   SyncServer    │─────────────▶│        HubActor         │   │
//! │  │  (GET /ws)      │              │ (registry owner, relay) │   │
//! │  └────────┬────────┘              └────────────┬────────────┘   │
//! │           │ upgrade                            │ try_enqueue    │
//! │           ▼                                    ▼                │
//! │  ┌─────────────────┐              ┌─────────────────────────┐   │
//! │  │   read_pump     │── close ────▶│  ClientSession queue    │   │
//! │  │  (per client)   │              │  ──▶ write_pump         │   │
//! │  └─────────────────┘              └─────────────────────────┘   │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Producers (mutation handlers) call `HubHandle::broadcast*` after their
//! write commits; the call never blocks.
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod cli;
pub mod config;
pub mod hub;
pub mod server;
pub mod session;
