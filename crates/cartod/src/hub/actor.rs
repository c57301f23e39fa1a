//! Hub actor - the single writer of the session registry.
//!
//! The actor runs one event loop that serializes registration,
//! unregistration and delivery. The registry map itself sits behind a
//! `parking_lot::RwLock` so the handle can answer `client_count` and
//! `sessions` without a round trip; only this actor ever takes the write
//! lock.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response send failures are ignored (the caller went away)
//! - The lock is never held across an `.await`

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use carto_core::{DisconnectReason, SessionId};

use super::commands::{HubCommand, HubError, Relayed};
use crate::session::{ClientSession, EnqueueError};

/// Live sessions keyed by id.
pub type Registry = Arc<RwLock<HashMap<SessionId, Arc<ClientSession>>>>;

// ============================================================================
// Hub Actor
// ============================================================================

/// Owns registry mutation and fan-out.
pub struct HubActor {
    commands: mpsc::Receiver<HubCommand>,
    relay: mpsc::Receiver<Relayed>,
    registry: Registry,
    max_sessions: usize,
    shutdown: CancellationToken,
    stopped: CancellationToken,
}

impl HubActor {
    pub fn new(
        commands: mpsc::Receiver<HubCommand>,
        relay: mpsc::Receiver<Relayed>,
        registry: Registry,
        max_sessions: usize,
        shutdown: CancellationToken,
        stopped: CancellationToken,
    ) -> Self {
        Self {
            commands,
            relay,
            registry,
            max_sessions,
            shutdown,
            stopped,
        }
    }

    /// Runs the event loop until shutdown is requested or every handle is
    /// dropped, then closes all sessions and signals `stopped`.
    pub async fn run(mut self) {
        info!(max_sessions = self.max_sessions, "Hub starting");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                Some(cmd) = self.commands.recv() => self.handle_command(cmd),

                Some(relayed) = self.relay.recv() => self.deliver(relayed),

                else => break,
            }
        }

        self.close_all();

        // Anything that raced with shutdown is refused without touching the registry.
        self.commands.close();
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                HubCommand::Register { respond_to, .. } => {
                    let _ = respond_to.send(Err(HubError::Closed));
                }
                HubCommand::Unregister { respond_to, .. } => {
                    let _ = respond_to.send(false);
                }
            }
        }
        self.relay.close();

        self.stopped.cancel();
        info!("Hub stopped");
    }

    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register {
                session,
                respond_to,
            } => {
                let result = self.handle_register(session);
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(result);
            }
            HubCommand::Unregister {
                session_id,
                reason,
                respond_to,
            } => {
                let removed = self.remove(session_id, reason);
                let _ = respond_to.send(removed);
            }
        }
    }

    fn handle_register(&mut self, session: Arc<ClientSession>) -> Result<(), HubError> {
        let id = session.id();
        let total = {
            let mut sessions = self.registry.write();

            if sessions.contains_key(&id) {
                return Err(HubError::SessionAlreadyExists(id));
            }
            if sessions.len() >= self.max_sessions {
                warn!(
                    session_id = %id,
                    max = self.max_sessions,
                    "Registry full, rejecting session"
                );
                return Err(HubError::RegistryFull {
                    max: self.max_sessions,
                });
            }
            if !session.activate() {
                return Err(HubError::SessionNotConnecting(id));
            }

            sessions.insert(id, Arc::clone(&session));
            sessions.len()
        };

        info!(
            session_id = %id,
            filter = %session.filter(),
            total,
            "Session registered"
        );
        Ok(())
    }

    /// Removes a session if present and starts its teardown.
    ///
    /// Idempotent: removing an absent session is a no-op returning false.
    fn remove(&mut self, session_id: SessionId, reason: DisconnectReason) -> bool {
        let (removed, total) = {
            let mut sessions = self.registry.write();
            let removed = sessions.remove(&session_id);
            (removed, sessions.len())
        };

        let Some(session) = removed else {
            debug!(session_id = %session_id, "Unregister for unknown session ignored");
            return false;
        };

        session.close(reason);
        let reason = session.close_reason().unwrap_or(reason);
        if reason == DisconnectReason::SlowConsumer {
            warn!(session_id = %session_id, total, "Slow consumer disconnected");
        } else {
            info!(session_id = %session_id, reason = %reason, total, "Session unregistered");
        }
        true
    }

    /// Fans one relayed frame out to every matching session.
    ///
    /// Each enqueue is non-blocking. Sessions whose queue is full are
    /// evicted as slow consumers once the read lock is released.
    fn deliver(&mut self, relayed: Relayed) {
        let mut delivered = 0usize;
        let mut evicted = Vec::new();

        {
            let sessions = self.registry.read();
            for (id, session) in sessions.iter() {
                if let Some(scope) = &relayed.scope {
                    if !session.filter().matches_scope(scope) {
                        continue;
                    }
                }
                match session.enqueue(Arc::clone(&relayed.frame)) {
                    Ok(()) => delivered += 1,
                    Err(EnqueueError::Full) => evicted.push((*id, DisconnectReason::SlowConsumer)),
                    Err(EnqueueError::Closed) => evicted.push((
                        *id,
                        session.close_reason().unwrap_or(DisconnectReason::Unregistered),
                    )),
                }
            }
        }

        for (id, reason) in &evicted {
            self.remove(*id, *reason);
        }

        debug!(
            scope = ?relayed.scope,
            delivered,
            evicted = evicted.len(),
            "Broadcast delivered"
        );
    }

    /// Empties the registry and closes every session's queue.
    fn close_all(&mut self) {
        let drained: Vec<Arc<ClientSession>> = {
            let mut sessions = self.registry.write();
            sessions.drain().map(|(_, session)| session).collect()
        };

        for session in &drained {
            session.close(DisconnectReason::HubShutdown);
        }

        info!(closed = drained.len(), "Closed all sessions");
    }
}
