//! WebSocket upgrade handler: turns an HTTP request into a registered
//! client session.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{info, warn};

use carto_core::{DisconnectReason, InterestFilter, BOARD_ID, PROJECT_ID};

use super::AppState;
use crate::config::SessionConfig;
use crate::hub::{HubError, HubHandle};
use crate::session::{read_pump, write_pump, ClientSession};

/// Optional scope parameters on the upgrade URL.
///
/// `GET /ws?project_id=p1&board_id=b7`. Blank values are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct ScopeQuery {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub board_id: Option<String>,
}

impl ScopeQuery {
    pub fn into_filter(self) -> InterestFilter {
        let mut filter = InterestFilter::new();
        if let Some(project_id) = self.project_id {
            filter.insert(PROJECT_ID, project_id);
        }
        if let Some(board_id) = self.board_id {
            filter.insert(BOARD_ID, board_id);
        }
        filter
    }
}

/// `GET /ws`.
///
/// Rejects disallowed origins with 403 before upgrading. Non-GET methods
/// never reach this handler (the router answers 405), and GETs without
/// upgrade headers are refused by the `WebSocketUpgrade` extractor.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ScopeQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !state.origins.allows(origin) {
        warn!(origin = origin.unwrap_or(""), "Rejected WebSocket upgrade from disallowed origin");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let filter = query.into_filter();
    let server = &state.config.server;
    let session_config = state.config.session.clone();
    let hub = state.hub.clone();

    ws.read_buffer_size(server.read_buffer_size)
        .write_buffer_size(server.write_buffer_size)
        .max_message_size(session_config.max_message_size)
        .on_failed_upgrade(|e| warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| run_session(socket, hub, filter, session_config))
}

/// Drives one upgraded connection from registration to teardown.
///
/// The reader runs on this task; the writer runs on its own. Whichever
/// side fails first records the disconnect reason, the session is
/// unregistered, and this returns once the writer has released the
/// transport.
pub async fn run_session(
    mut socket: WebSocket,
    hub: HubHandle,
    filter: InterestFilter,
    config: SessionConfig,
) {
    let (session, queue) = ClientSession::new(filter, config.queue_capacity);
    let id = session.id();

    if let Err(e) = hub.register(Arc::clone(&session)).await {
        warn!(session_id = %id, error = %e, "Session rejected");
        let frame = refuse(&session, &e);
        // The peer may already be gone.
        let _ = socket.send(Message::Close(Some(frame))).await;
        return;
    }

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_pump(Arc::clone(&session), sink, queue, config.clone()));

    let reason = read_pump(&session, stream, config.pong_wait()).await;
    session.close(reason);
    hub.unregister(id, reason).await;

    if let Err(e) = writer.await {
        warn!(session_id = %id, error = %e, "Writer task failed");
        session.mark_closed();
    }

    info!(
        session_id = %id,
        reason = %session.close_reason().unwrap_or(reason),
        "Session ended"
    );
}

/// Records why the hub refused `session`, releases it, and returns the
/// close frame for the peer.
fn refuse(session: &ClientSession, error: &HubError) -> CloseFrame {
    let (reason, code) = match error {
        HubError::Closed => (DisconnectReason::HubShutdown, close_code::AWAY),
        HubError::RegistryFull { .. } => (DisconnectReason::Rejected, close_code::AGAIN),
        _ => (DisconnectReason::Rejected, close_code::ERROR),
    };
    session.close(reason);
    session.mark_closed();
    CloseFrame {
        code,
        reason: error.to_string().into(),
    }
}
