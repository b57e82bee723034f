//! WebSocket upgrade and the per-connection message loop (§4.E). The single-
//! writer-per-connection pattern (a dedicated task draining the connection's
//! `SendQueue`) follows the teacher's `ws.rs`; everything downstream of the
//! parsed frame is `chatcore-hub` + `chatcore-orchestrator`, not this crate.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use chatcore_protocol::{ClientFrame, ServerFrame, close_codes};
use futures::{SinkExt, StreamExt};

use crate::{auth_routes::ACCESS_COOKIE, client_ip::resolve_client_ip, state::AppState};

pub async fn ws_upgrade_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: axum::http::HeaderMap,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(access_token) = jar.get(ACCESS_COOKIE).map(|c| c.value().to_string()) else {
        return (StatusCode::UNAUTHORIZED, "missing access token").into_response();
    };
    let claims = match state.auth.verify_access_token(&access_token) {
        Ok(claims) => claims,
        Err(_) => return (StatusCode::UNAUTHORIZED, "invalid or expired access token").into_response(),
    };
    let client_ip = resolve_client_ip(&headers, peer);

    ws.on_upgrade(move |socket| handle_socket(socket, state, claims.user_id, claims.username, client_ip))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String, user_role: String, client_ip: IpAddr) {
    let connection = match state.hub.register(&user_id).await {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!(%error, user_id, "failed to register connection");
            return;
        },
    };
    let session_id = connection.session_id.clone();
    tracing::info!(session_id = %session_id, user_id, "ws: connection established");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let send_queue = connection.send_queue();
    let write_session_id = session_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = send_queue.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                tracing::debug!(session_id = %write_session_id, "ws: write loop closed");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let idle_timeout = state.config.ws.idle_timeout();
    let mut close_code = close_codes::NORMAL;
    loop {
        let next_message = tokio::time::timeout(idle_timeout, ws_rx.next()).await;
        let message = match next_message {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(error))) => {
                tracing::debug!(session_id = %session_id, %error, "ws: read error");
                break;
            },
            Ok(None) => break,
            Err(_) => {
                tracing::debug!(session_id = %session_id, "ws: idle timeout");
                break;
            },
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        match state.hub.accept_inbound(&session_id, text.as_bytes()).await {
            Ok(ClientFrame::Chat { body, id }) => {
                handle_chat(&state, &session_id, client_ip, &user_id, &user_role, &body, id).await;
            },
            Ok(ClientFrame::Ping { id }) => {
                state.hub.send_to_session(&session_id, ServerFrame::Pong { id }.to_json());
            },
            Ok(ClientFrame::Close { .. }) => break,
            Err(chatcore_hub::Error::FrameTooLarge { .. }) => {
                close_code = close_codes::PROTOCOL_ERROR;
                break;
            },
            Err(error) => {
                tracing::debug!(session_id = %session_id, %error, "ws: malformed frame");
                let frame = ServerFrame::Error {
                    message: "invalid frame".to_string(),
                    id: None,
                };
                state.hub.send_to_session(&session_id, frame.to_json());
            },
        }
    }

    state.hub.close(&session_id, close_code).await;
    write_handle.abort();
    tracing::info!(session_id = %session_id, user_id, "ws: connection closed");
}

async fn handle_chat(
    state: &AppState,
    session_id: &str,
    client_ip: IpAddr,
    user_id: &str,
    user_role: &str,
    body: &str,
    id: Option<String>,
) {
    match state.orchestrator.handle(client_ip, user_id, session_id, user_role, body).await {
        Ok(reply) => {
            let frame = ServerFrame::ChatReply {
                message: reply.message,
                source_tag: reply.source_tag,
                confidence: reply.confidence,
                timestamp: reply.timestamp_ms,
                id,
            };
            state.hub.send_to_session(session_id, frame.to_json());
        },
        Err(chatcore_orchestrator::Error::RateLimited { retry_after_seconds }) => {
            let frame = ServerFrame::RateLimited {
                retry_after: retry_after_seconds,
                id,
            };
            state.hub.send_to_session(session_id, frame.to_json());
        },
    }
}
