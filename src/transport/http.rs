//! Request/response endpoint (C1): accepts an arbitrary method+path+body
//! request, resolves it through the Router (C5) via the parser (C6), and
//! dispatches through the processor (C7). One generic handler rather than
//! one `axum` route per command — the dynamic route table is the source of
//! truth, not the `axum::Router` tree, mirroring the teacher's single
//! `comprehensive_health_check`-style catch-all handlers layered over a
//! data-driven dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::{to_bytes, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::gateway::Gateway;
use crate::parser::reqresp::ReqrespInput;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
    let Some(raw) = raw else { return HashMap::new() };
    url::form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect()
}

fn header_map(req: &Request) -> HashMap<String, String> {
    req.headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
        .collect()
}

#[derive(Serialize)]
struct Envelope {
    code: i32,
    body: String,
    err_msg: String,
}

impl Envelope {
    fn ok(body: impl Into<String>) -> Self {
        Self {
            code: 200,
            body: body.into(),
            err_msg: String::new(),
        }
    }

    fn error(code: i32, err_msg: impl Into<String>) -> Self {
        Self {
            code,
            body: String::new(),
            err_msg: err_msg.into(),
        }
    }
}

pub async fn handler(
    State(gateway): State<Arc<Gateway>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    req: Request,
) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let query = parse_query(req.uri().query());
    let headers = header_map(&req);

    let body_bytes = to_bytes(req.into_body(), MAX_BODY_BYTES)
        .await
        .unwrap_or_else(|_| Bytes::new());

    let input = ReqrespInput {
        method: &method,
        path: &path,
        headers,
        body: body_bytes.as_ref(),
        query,
        session_id: None,
        client_ip: &addr.to_string(),
        received_at: now_ms(),
    };

    let parsed = gateway.parser.parse_reqresp(&gateway.router, input);
    let msg = match parsed {
        Ok(msg) => msg,
        Err(e) => {
            let kind = crate::error::GatewayErrorKind::from(&e);
            let envelope = Envelope::error(kind.http_status() as i32, e.to_string());
            return json_response(kind.http_status(), &envelope);
        }
    };

    match gateway.processor.process(&msg).await {
        Ok(result) => {
            let envelope = if result.error_message.is_empty() {
                Envelope::ok(result.json_body)
            } else {
                Envelope::error(result.status_code, result.error_message)
            };
            json_response(result.status_code as u16, &envelope)
        }
        Err(e) => {
            let (kind, message) = crate::processor::error_response(&e);
            let envelope = Envelope::error(kind.http_status() as i32, message);
            json_response(kind.http_status(), &envelope)
        }
    }
}

fn json_response(status: u16, envelope: &Envelope) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::to_string(envelope).unwrap_or_else(|_| "{}".to_string());
    (status, [("content-type", "application/json")], body).into_response()
}
