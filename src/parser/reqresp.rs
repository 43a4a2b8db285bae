//! Request/response parser (spec.md §4.5): method/path/headers/body/query
//! into a `UnifiedMessage`, resolved against the Router (C5). Grounded on
//! `HttpMessageParser` in the original's `message_processor.hpp`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::config::Platform;
use crate::error::ParserError;
use crate::router::Router;

use super::message::{Body, SessionContext, UnifiedHeader, UnifiedMessage};

static NEXT_HTTP_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Generates a distinct session id prefix for the request/response
/// protocol so it never collides with streaming session ids
/// (spec.md §4.5).
pub fn next_session_id() -> String {
    format!("http_{}", NEXT_HTTP_SESSION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Kept from the original's `HttpMessageParser::extract_cmd_from_path`
/// (spec.md §9 supplemented feature), a small router-independent helper
/// exercised only by this module's own tests.
#[cfg(test)]
fn extract_cmd_from_path(path: &str) -> Option<&str> {
    path.rsplit('/').next()
}

/// One field the request/response body policy can populate from headers
/// or query parameters, preferring the header.
fn pick(headers: &HashMap<String, String>, query: &HashMap<String, String>, header_name: &str, query_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .cloned()
        .or_else(|| query.get(query_name).cloned())
}

fn bearer_token(headers: &HashMap<String, String>, query: &HashMap<String, String>) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.strip_prefix("Bearer ").map(str::to_string))
        .or_else(|| query.get("token").cloned())
        .unwrap_or_default()
}

pub struct ReqrespInput<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub headers: HashMap<String, String>,
    pub body: &'a [u8],
    pub query: HashMap<String, String>,
    pub session_id: Option<String>,
    pub client_ip: &'a str,
    pub received_at: u64,
}

pub fn parse_reqresp(router: &Router, input: ReqrespInput<'_>) -> Result<UnifiedMessage, ParserError> {
    if input.method.is_empty() || input.path.is_empty() {
        return Err(ParserError::EmptyRequestLine);
    }
    if !input.path.starts_with(&router.api_prefix()) {
        return Err(ParserError::PrefixMismatch);
    }

    let resolution = router.resolve_reqresp(input.method, input.path)?;

    let token = bearer_token(&input.headers, &input.query);
    let device_id = pick(&input.headers, &input.query, "x-device-id", "device_id").unwrap_or_default();
    let platform_str = pick(&input.headers, &input.query, "x-platform", "platform")
        .unwrap_or_else(|| "unknown".to_string());

    let content_type = input
        .headers
        .get("content-type")
        .map(String::as_str)
        .unwrap_or_default();
    let is_json_body_method = matches!(input.method.to_uppercase().as_str(), "POST" | "PUT" | "PATCH");

    let json_text = if is_json_body_method && !input.body.is_empty() && content_type.contains("application/json") {
        String::from_utf8_lossy(input.body).to_string()
    } else {
        let query_obj: Value = Value::Object(
            input
                .query
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        );
        query_obj.to_string()
    };

    let parsed: Value = serde_json::from_str(&json_text).unwrap_or(Value::Null);
    let from_uid = parsed.get("from_uid").and_then(Value::as_str).map(str::to_string);
    let to_uid = parsed.get("to_uid").and_then(Value::as_str).map(str::to_string);

    let mut header = UnifiedHeader::new(resolution.cmd_id);
    header.timestamp = input.received_at;
    header.from_uid = from_uid;
    header.to_uid = to_uid;
    header.token = token;
    header.device_id = device_id;
    header.platform = Platform::from(platform_str.as_str());

    let session_id = input.session_id.unwrap_or_else(next_session_id);
    let mut session_ctx = SessionContext::framed(session_id, input.client_ip, input.received_at);
    session_ctx.protocol = super::message::Protocol::Reqresp;
    session_ctx.method = input.method.to_string();
    session_ctx.path = input.path.to_string();
    session_ctx.raw_body = input.body.to_vec();

    Ok(UnifiedMessage {
        header,
        body: Body::Json(json_text),
        session_ctx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;

    fn router() -> Router {
        Router::new(
            RouteConfig::new("/api/v1").with_route("POST", "/message/send", 2001, "messaging"),
        )
    }

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn builds_header_from_authorization_and_device_headers() {
        let router = router();
        let input = ReqrespInput {
            method: "POST",
            path: "/api/v1/message/send",
            headers: headers(&[
                ("authorization", "Bearer tok123"),
                ("x-device-id", "d1"),
                ("x-platform", "web"),
                ("content-type", "application/json"),
            ]),
            body: br#"{"from_uid":"u1","to_uid":"u1","text":"hi"}"#,
            query: HashMap::new(),
            session_id: None,
            client_ip: "127.0.0.1",
            received_at: 1000,
        };
        let msg = parse_reqresp(&router, input).unwrap();
        assert_eq!(msg.header.cmd_id, 2001);
        assert_eq!(msg.header.token, "tok123");
        assert_eq!(msg.header.device_id, "d1");
        assert_eq!(msg.header.from_uid, Some("u1".to_string()));
    }

    #[test]
    fn missing_path_prefix_is_invalid_request() {
        let router = router();
        let input = ReqrespInput {
            method: "POST",
            path: "/other/message/send",
            headers: HashMap::new(),
            body: b"",
            query: HashMap::new(),
            session_id: None,
            client_ip: "127.0.0.1",
            received_at: 0,
        };
        assert!(matches!(
            parse_reqresp(&router, input),
            Err(ParserError::PrefixMismatch)
        ));
    }

    #[test]
    fn extract_cmd_from_path_helper() {
        assert_eq!(extract_cmd_from_path("/api/v1/message/2001"), Some("2001"));
    }
}
