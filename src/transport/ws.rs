//! Streaming endpoint (C1): the WebSocket upgrade handler, handshake
//! credential extraction, and the per-session read loop. Grounded on
//! `examples/original_source/common/network/websocket_session.hpp`'s
//! read-loop shape, replacing its callback-based framing with axum's
//! `WebSocket` stream/sink split.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use futures_util::StreamExt;
use tracing::{info, warn};

use crate::config::Platform;
use crate::gateway::Gateway;
use crate::parser::encode_frame;
use crate::parser::UnifiedHeader;
use crate::utils::generate_device_fingerprint;

use super::session::{self, BoundIdentity, Session};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

/// Bearer credential from the handshake: the typed `Authorization` header
/// when present, else the `?token=` query parameter (spec.md §4.1).
fn bearer_from(
    typed_auth: &Option<TypedHeader<Authorization<Bearer>>>,
    query: &std::collections::HashMap<String, String>,
) -> String {
    typed_auth
        .as_ref()
        .map(|TypedHeader(auth)| auth.token().to_string())
        .or_else(|| query.get("token").cloned())
        .unwrap_or_default()
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<std::collections::HashMap<String, String>>,
    typed_auth: Option<TypedHeader<Authorization<Bearer>>>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, query, typed_auth, headers, addr))
}

async fn handle_socket(
    socket: WebSocket,
    gateway: Arc<Gateway>,
    query: std::collections::HashMap<String, String>,
    typed_auth: Option<TypedHeader<Authorization<Bearer>>>,
    headers: HeaderMap,
    addr: SocketAddr,
) {
    let session_id = session::next_session_id();
    let (session, rx) = Session::new(session_id.clone(), addr.to_string());
    gateway.transport.register(session.clone()).await;

    let (sink, mut stream) = socket.split();
    tokio::spawn(session::run_write_loop(session.clone(), rx, sink));

    let token = bearer_from(&typed_auth, &query);
    let device_id = query.get("device_id").cloned().unwrap_or_default();
    let platform = Platform::from(query.get("platform").map(String::as_str).unwrap_or("unknown"));

    if token.is_empty() {
        warn!(session_id = %session_id, "streaming handshake missing bearer credential");
        session.close();
        gateway.transport.unregister(&session_id).await;
        return;
    }

    let user_info = match gateway.auth.verify_access_token(&token, &device_id).await {
        Ok(info) => info,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "streaming handshake auth failed");
            session.close();
            gateway.transport.unregister(&session_id).await;
            return;
        }
    };

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let fingerprint = generate_device_fingerprint(&user_agent, &addr, &None, &None, &None, &headers);

    if let Err(e) = gateway
        .registry
        .add(&user_info.user_id, &device_id, platform, &session_id, now_ms() / 1000, fingerprint)
        .await
    {
        warn!(session_id = %session_id, error = %e, "registry add failed, closing session");
        session.close();
        gateway.transport.unregister(&session_id).await;
        return;
    }

    *session.bound_identity.write().await = Some(BoundIdentity {
        user_id: user_info.user_id.clone(),
        device_id: device_id.clone(),
        platform,
    });

    info!(session_id = %session_id, user_id = %user_info.user_id, "streaming session bound");

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(_) => break,
        };
        match frame {
            WsMessage::Binary(bytes) => {
                let raw = bytes.to_vec();
                let parsed = gateway
                    .parser
                    .parse_frame(&raw, &session_id, &addr.to_string(), now_ms());
                let msg = match parsed {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "frame decode failed, dropping");
                        continue;
                    }
                };
                let cmd_id = msg.header.cmd_id;
                let seq = msg.header.seq;
                let result = gateway.processor.process(&msg).await;
                let body = match result {
                    Ok(r) => r.framed_payload,
                    Err(e) => {
                        let (_, message) = crate::processor::error_response(&e);
                        message.into_bytes()
                    }
                };
                let mut header = UnifiedHeader::new(cmd_id);
                header.timestamp = now_ms();
                header.seq = seq;
                if let Ok(response_frame) = encode_frame(&header, &body) {
                    let _ = session.send(response_frame);
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
        if session.is_closed() {
            break;
        }
    }

    let _ = gateway.registry.remove_by_session(&session_id).await;
    gateway.transport.unregister(&session_id).await;
    session.close();
    info!(session_id = %session_id, "streaming session closed");
}
