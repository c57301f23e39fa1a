//! Client interface for the hub.
//!
//! `HubHandle` is cheap to clone and is what request handlers, upgrade
//! handlers and the server hold. Registration goes through the actor;
//! broadcasting is a non-blocking push onto the relay; counts and
//! snapshots read the registry directly under its read lock.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use carto_core::{DisconnectReason, Scope, SessionId, SessionInfo};
use carto_protocol::{Changes, Envelope};

use super::actor::Registry;
use super::commands::{HubCommand, HubError, RelayOutcome, Relayed};
use crate::session::{ClientSession, Frame};

// ============================================================================
// Hub Handle
// ============================================================================

/// Handle for interacting with the hub actor.
///
/// # Usage
///
/// ```ignore
/// // After a task mutation commits:
/// hub.broadcast_task_updated(&task.id, &task.board_id, changes, &task)?;
///
/// // Only sessions that connected with ?project_id=p1:
/// hub.broadcast_filtered(&envelope, "project_id", "p1")?;
/// ```
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    relay: mpsc::Sender<Relayed>,
    registry: Registry,
    shutdown: CancellationToken,
    stopped: CancellationToken,
}

impl HubHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<HubCommand>,
        relay: mpsc::Sender<Relayed>,
        registry: Registry,
        shutdown: CancellationToken,
        stopped: CancellationToken,
    ) -> Self {
        Self {
            commands,
            relay,
            registry,
            shutdown,
            stopped,
        }
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Adds a session to the registry and moves it to `Active`.
    ///
    /// # Errors
    ///
    /// - `HubError::Closed` if the hub has shut down
    /// - `HubError::RegistryFull` if the registry is at maximum capacity
    /// - `HubError::SessionAlreadyExists` if the id is already registered
    /// - `HubError::SessionNotConnecting` if the session already started closing
    pub async fn register(&self, session: Arc<ClientSession>) -> Result<(), HubError> {
        if self.shutdown.is_cancelled() {
            return Err(HubError::Closed);
        }

        let (tx, rx) = oneshot::channel();

        self.commands
            .send(HubCommand::Register {
                session,
                respond_to: tx,
            })
            .await
            .map_err(|_| HubError::Closed)?;

        rx.await.map_err(|_| HubError::Closed)?
    }

    /// Removes a session if present and closes its queue.
    ///
    /// Returns true if the session was registered. Unregistering an absent
    /// session, or unregistering after shutdown, is a no-op.
    pub async fn unregister(&self, session_id: SessionId, reason: DisconnectReason) -> bool {
        let (tx, rx) = oneshot::channel();

        let sent = self
            .commands
            .send(HubCommand::Unregister {
                session_id,
                reason,
                respond_to: tx,
            })
            .await;
        if sent.is_err() {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    // ------------------------------------------------------------------------
    // Broadcast
    // ------------------------------------------------------------------------

    /// Sends an envelope to every registered session.
    ///
    /// Never blocks: the envelope is serialized once and pushed onto the
    /// relay; if the relay is full it is dropped and logged.
    ///
    /// # Errors
    ///
    /// Only `HubError::Envelope` when the envelope cannot be serialized.
    pub fn broadcast(&self, envelope: &Envelope) -> Result<RelayOutcome, HubError> {
        self.relay_envelope(envelope, None)
    }

    /// Sends an envelope only to sessions whose filter has `key == value`.
    ///
    /// Sessions without `key` never receive it.
    ///
    /// # Errors
    ///
    /// - `HubError::InvalidScope` if `key` or `value` is empty
    /// - `HubError::Envelope` when the envelope cannot be serialized
    pub fn broadcast_filtered(
        &self,
        envelope: &Envelope,
        key: &str,
        value: &str,
    ) -> Result<RelayOutcome, HubError> {
        let scope = Scope::new(key, value)?;
        self.relay_envelope(envelope, Some(scope))
    }

    fn relay_envelope(
        &self,
        envelope: &Envelope,
        scope: Option<Scope>,
    ) -> Result<RelayOutcome, HubError> {
        let text = envelope.to_json().map_err(|e| {
            error!(kind = %envelope.kind(), error = %e, "Failed to serialize broadcast, dropping");
            HubError::from(e)
        })?;

        if self.shutdown.is_cancelled() {
            return Ok(RelayOutcome::HubStopped);
        }

        let relayed = Relayed {
            frame: Frame::from(text),
            scope,
        };
        match self.relay.try_send(relayed) {
            Ok(()) => Ok(RelayOutcome::Queued),
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    kind = %envelope.kind(),
                    scope = ?dropped.scope,
                    "Broadcast relay full, dropping message"
                );
                Ok(RelayOutcome::DroppedFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Ok(RelayOutcome::HubStopped),
        }
    }

    /// Broadcasts `task.created`.
    pub fn broadcast_task_created<T: Serialize + ?Sized>(
        &self,
        task_id: &str,
        board_id: &str,
        task: &T,
    ) -> Result<RelayOutcome, HubError> {
        self.broadcast(&Envelope::task_created(task_id, board_id, task)?)
    }

    /// Broadcasts `task.updated`.
    pub fn broadcast_task_updated<T: Serialize + ?Sized>(
        &self,
        task_id: &str,
        board_id: &str,
        changes: Changes,
        task: &T,
    ) -> Result<RelayOutcome, HubError> {
        self.broadcast(&Envelope::task_updated(task_id, board_id, changes, task)?)
    }

    /// Broadcasts `task.deleted`.
    pub fn broadcast_task_deleted(
        &self,
        task_id: &str,
        board_id: &str,
    ) -> Result<RelayOutcome, HubError> {
        self.broadcast(&Envelope::task_deleted(task_id, board_id)?)
    }

    /// Broadcasts `project.created`.
    pub fn broadcast_project_created<T: Serialize + ?Sized>(
        &self,
        project_id: &str,
        project: &T,
    ) -> Result<RelayOutcome, HubError> {
        self.broadcast(&Envelope::project_created(project_id, project)?)
    }

    /// Broadcasts `project.updated`.
    pub fn broadcast_project_updated<T: Serialize + ?Sized>(
        &self,
        project_id: &str,
        changes: Changes,
        project: &T,
    ) -> Result<RelayOutcome, HubError> {
        self.broadcast(&Envelope::project_updated(project_id, changes, project)?)
    }

    /// Broadcasts `board.updated`.
    pub fn broadcast_board_updated<T: Serialize + ?Sized>(
        &self,
        board_id: &str,
        project_id: &str,
        changes: Changes,
        board: &T,
    ) -> Result<RelayOutcome, HubError> {
        self.broadcast(&Envelope::board_updated(board_id, project_id, changes, board)?)
    }

    // ------------------------------------------------------------------------
    // Inspection and lifecycle
    // ------------------------------------------------------------------------

    /// Number of registered sessions.
    pub fn client_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Snapshot of every registered session.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry
            .read()
            .values()
            .map(|session| session.info())
            .collect()
    }

    /// False once shutdown has been requested.
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Stops the hub loop, closes every session's queue and waits until the
    /// registry is empty. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.stopped.cancelled().await;
    }
}
