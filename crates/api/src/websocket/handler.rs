//! WebSocket handler for Axum
//!
//! Authenticates the upgrade request, registers the connection, then reads
//! from the client only to notice when it goes away.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{Stream, StreamExt};

use crate::auth::{extract_credential, Identity};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

use super::{
    connection::Connection,
    lifecycle::{Lifecycle, Phase},
    registry::ConnectionRegistry,
};

/// Query string as decoded pairs, in order
type QueryPairs = Vec<(String, String)>;

/// First `token` pair of the query string.
///
/// Repeated parameters do not reject the request; an undecodable query
/// string is treated as carrying no token.
fn query_token(query: &Result<Query<QueryPairs>, QueryRejection>) -> Option<&str> {
    let Ok(Query(pairs)) = query else {
        return None;
    };

    pairs
        .iter()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.as_str())
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
///
/// The credential is checked before the upgrade is looked at, so a request
/// without a valid token is answered with 401 and never reaches the registry.
/// Any origin is accepted.
pub async fn ws_handler(
    State(state): State<AppState>,
    query: Result<Query<QueryPairs>, QueryRejection>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    let mut lifecycle = Lifecycle::new();

    let credential = extract_credential(query_token(&query), &headers);
    let identity = match state.auth_gate.authenticate(credential.as_deref()) {
        Ok(identity) => identity,
        Err(e) => {
            lifecycle.advance(Phase::Rejected);
            tracing::warn!(
                attempt_id = %lifecycle.attempt_id(),
                error = ?e,
                "WebSocket auth failed"
            );
            return Err(e.into());
        }
    };
    lifecycle.advance(Phase::Authenticated);

    let ws = ws.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    tracing::info!(
        user_id = %identity.user_id,
        tenant_id = %identity.tenant_id,
        "WebSocket connection upgrade requested"
    );

    let registry = Arc::clone(&state.registry);
    Ok(ws
        .on_failed_upgrade(|e| tracing::warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| handle_socket(socket, identity, registry, lifecycle)))
}

/// Handle individual WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    identity: Identity,
    registry: Arc<ConnectionRegistry>,
    mut lifecycle: Lifecycle,
) {
    lifecycle.advance(Phase::Upgraded);

    let (sender, mut receiver) = socket.split();
    let conn = registry.register(identity, sender).await;
    lifecycle.bind_session(conn.session_id);
    lifecycle.advance(Phase::Registered);

    lifecycle.advance(Phase::Reading);
    let reason = read_until_closed(&conn, &mut receiver).await;

    lifecycle.advance(Phase::Closing);
    tracing::info!(
        session_id = %conn.session_id,
        user_id = %conn.user_id,
        reason = reason,
        "WebSocket connection closing"
    );
    registry.remove(&conn.session_id).await;
    lifecycle.advance(Phase::Closed);
}

/// Drain inbound frames until the client disconnects or the registry drops
/// the connection. Inbound content is ignored.
async fn read_until_closed<S, E>(conn: &Connection, receiver: &mut S) -> &'static str
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let closed = conn.closed();
    tokio::pin!(closed);

    loop {
        tokio::select! {
            _ = &mut closed => return "dropped by server",
            msg = receiver.next() => match msg {
                None => return "stream ended",
                Some(Err(e)) => {
                    tracing::debug!(session_id = %conn.session_id, error = %e, "WebSocket read error");
                    return "read error";
                }
                Some(Ok(Message::Close(_))) => return "close frame received",
                Some(Ok(_)) => {}
            },
        }
    }
}
