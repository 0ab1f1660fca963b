//! WebSocket gateway for `/socket/{sessionId}/{role}`.
//!
//! Each upgraded socket is split into a writer task draining the
//! connection's [`Outbound`] queue (plus periodic pings) and a reader loop
//! decoding client messages for the session coordinator. Routing happens
//! after the upgrade so rejections can carry a WebSocket close code.

use std::sync::Arc;
use std::time::Duration;

use arrows_core::{ConnectionId, ProtocolError};
use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::codec::{self, ClientMessage, Envelope};
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_REJECTIONS_TOTAL};
use crate::router::{RoutedRole, parse_route};
use crate::server::AppState;
use crate::transport::{CloseReason, ConnectionHub, MessageTransport, Outbound};

/// Optional `?token=` query parameter.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    /// JWT, for clients that cannot set headers on the upgrade request.
    pub token: Option<String>,
}

/// Raw route and credentials of an upgrade request.
#[derive(Debug)]
struct SocketRequest {
    session: String,
    role: String,
    credentials: Option<String>,
}

/// `Authorization: Bearer <token>` value, if present.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// GET /socket/{session_id}/{role}
pub async fn socket_handler(
    ws: WebSocketUpgrade,
    Path((session, role)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let request = SocketRequest {
        session,
        role,
        credentials: bearer_token(&headers).or(query.token),
    };
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, request))
}

async fn handle_socket(socket: WebSocket, state: AppState, request: SocketRequest) {
    let (connection, rx) = state.hub.register();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    run_connection(socket, &state, connection, rx, request).await;

    state.hub.unregister(&connection);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
}

#[instrument(
    skip_all,
    fields(connection_id = %connection, session_id = %request.session, role = %request.role)
)]
async fn run_connection(
    socket: WebSocket,
    state: &AppState,
    connection: ConnectionId,
    rx: mpsc::Receiver<Outbound>,
    request: SocketRequest,
) {
    let (ws_tx, ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_loop(ws_tx, rx, state.config.heartbeat_interval()));

    let routed = match route(state, connection, &request).await {
        Ok(routed) => routed,
        Err(err) => {
            counter!(WS_REJECTIONS_TOTAL, "code" => err.code()).increment(1);
            warn!(code = err.code(), error = %err, "connection rejected");
            state.hub.close(connection, CloseReason::from_error(&err));
            let _ = writer.await;
            return;
        }
    };
    info!(subject = %routed.identity.subject, "connection attached");

    let max_malformed = state.config.max_consecutive_malformed;
    tokio::select! {
        _ = &mut writer => debug!("writer finished"),
        () = read_loop(ws_rx, connection, &routed, &state.hub, max_malformed) => debug!("reader finished"),
    }

    routed.session.disconnect(connection, routed.role).await;
    info!("connection closed");
}

async fn route(
    state: &AppState,
    connection: ConnectionId,
    request: &SocketRequest,
) -> Result<RoutedRole, ProtocolError> {
    let (session_id, role) = parse_route(&request.session, &request.role)?;
    state
        .router
        .accept(connection, session_id, role, request.credentials.as_deref())
        .await
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    heartbeat: Duration,
) {
    let mut ping_interval = tokio::time::interval(heartbeat);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Outbound::Text(text)) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close(reason)) => {
                    let frame = CloseFrame {
                        code: reason.code,
                        reason: reason.reason.into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => {
                    let _ = ws_tx.close().await;
                    break;
                }
            },
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    connection: ConnectionId,
    routed: &RoutedRole,
    hub: &Arc<ConnectionHub>,
    max_malformed: u32,
) {
    let mut malformed = 0u32;
    while let Some(Ok(msg)) = ws_rx.next().await {
        let decoded = match msg {
            Message::Text(text) => codec::decode_client(text.as_str()),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => codec::decode_client(text),
                Err(_) => Err(ProtocolError::Validation("binary frame is not UTF-8".into())),
            },
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match decoded {
            Ok(ClientMessage::Answer(answer)) => {
                malformed = 0;
                routed.session.answer(connection, routed.role, answer).await;
            }
            Err(err) => {
                malformed += 1;
                warn!(malformed, error = %err, "malformed message");
                if malformed >= max_malformed {
                    hub.close(connection, CloseReason::from_error(&err));
                    break;
                }
                let _ = hub.send(connection, &Envelope::error(&err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_is_extracted() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn non_bearer_schemes_are_ignored() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), None);
        let _ = headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(bearer_token(&headers), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
