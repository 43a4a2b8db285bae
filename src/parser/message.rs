//! The canonical cross-protocol message shape (spec.md §3). Grounded on
//! `examples/original_source/gateway/message_processor/unified_message.hpp`.

use crate::config::Platform;
use serde::{Deserialize, Serialize};

/// Metadata every request carries, regardless of wire protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedHeader {
    pub version: String,
    pub seq: u32,
    pub cmd_id: u32,
    pub timestamp: u64,
    pub from_uid: Option<String>,
    pub to_uid: Option<String>,
    pub token: String,
    pub device_id: String,
    pub platform: Platform,
}

impl UnifiedHeader {
    pub fn new(cmd_id: u32) -> Self {
        Self {
            version: "1".to_string(),
            seq: 0,
            cmd_id,
            timestamp: 0,
            from_uid: None,
            to_uid: None,
            token: String::new(),
            device_id: String::new(),
            platform: Platform::Unknown,
        }
    }
}

/// Which transport produced a [`UnifiedMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Framed,
    Reqresp,
}

/// Protocol-specific context kept alongside a message, unified across
/// both transports.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub protocol: Protocol,
    pub session_id: String,
    pub client_ip: String,
    pub received_at: u64,
    pub method: String,
    pub path: String,
    pub raw_body: Vec<u8>,
}

impl SessionContext {
    pub fn framed(session_id: impl Into<String>, client_ip: impl Into<String>, received_at: u64) -> Self {
        Self {
            protocol: Protocol::Framed,
            session_id: session_id.into(),
            client_ip: client_ip.into(),
            received_at,
            method: String::new(),
            path: String::new(),
            raw_body: Vec::new(),
        }
    }
}

/// Exactly one of the two body shapes is populated, never both: the
/// framed transport's opaque payload, or the request/response JSON text.
#[derive(Debug, Clone)]
pub enum Body {
    Structured(Vec<u8>),
    Json(String),
}

impl Body {
    pub fn as_structured(&self) -> Option<&[u8]> {
        match self {
            Body::Structured(b) => Some(b),
            Body::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&str> {
        match self {
            Body::Json(s) => Some(s),
            Body::Structured(_) => None,
        }
    }
}

/// One inbound request normalized across protocols. Produced once by a
/// parser, consumed once by the processor (C7).
#[derive(Debug, Clone)]
pub struct UnifiedMessage {
    pub header: UnifiedHeader,
    pub body: Body,
    pub session_ctx: SessionContext,
}
