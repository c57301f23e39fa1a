//! Connection registry (hub) using the Actor pattern.
//!
//! The hub is the single authority over the set of live sessions. All
//! registry mutation and every broadcast delivery happen on one task.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐ HubCommand (mpsc)  ┌──────────────┐ try_enqueue ┌───────────────┐
//! │ upgrade handlers │───────────────────▶│              │────────────▶│ session queue │
//! └──────────────────┘                    │   HubActor   │             └───────────────┘
//! ┌──────────────────┐ Relayed (bounded)  │ (event loop) │ try_enqueue ┌───────────────┐
//! │ mutation handlers│───────────────────▶│              │────────────▶│ session queue │
//! └──────────────────┘   drop on full     └──────┬───────┘             └───────────────┘
//!                                                │ write lock
//!                                                ▼
//!                               RwLock<HashMap<SessionId, Arc<ClientSession>>>
//!                                                ▲ read lock
//!                                   HubHandle::client_count / sessions
//! ```
//!
//! Delivery is best-effort, at-most-once and ordered per session. A session
//! whose queue is full when the hub delivers is disconnected as a slow
//! consumer; producers are never paused.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;

mod actor;
mod commands;
mod handle;

pub use actor::{HubActor, Registry};
pub use commands::{HubCommand, HubError, RelayOutcome, Relayed};
pub use handle::HubHandle;

/// Spawn the hub actor and return a handle for interaction.
///
/// This function:
/// 1. Creates the command channel and the bounded broadcast relay
/// 2. Spawns the HubActor on a tokio task
/// 3. Returns a HubHandle sharing the registry for read-only queries
///
/// Must be called from within a tokio runtime.
///
/// # Example
///
/// ```no_run
/// use cartod::config::HubConfig;
/// use cartod::hub::spawn_hub;
///
/// #[tokio::main]
/// async fn main() {
///     let hub = spawn_hub(&HubConfig::default());
///     hub.broadcast_task_deleted("task-1", "board-1").ok();
///     hub.shutdown().await;
/// }
/// ```
pub fn spawn_hub(config: &HubConfig) -> HubHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity.max(1));
    let (relay_tx, relay_rx) = mpsc::channel(config.relay_capacity.max(1));
    let registry = Registry::default();
    let shutdown = CancellationToken::new();
    let stopped = CancellationToken::new();

    let actor = HubActor::new(
        cmd_rx,
        relay_rx,
        Arc::clone(&registry),
        config.max_sessions,
        shutdown.clone(),
        stopped.clone(),
    );
    tokio::spawn(actor.run());

    HubHandle::new(cmd_tx, relay_tx, registry, shutdown, stopped)
}
