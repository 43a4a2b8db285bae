//! Crate-wide error taxonomy.
//!
//! Each subsystem gets its own `thiserror` enum (mirroring the teacher's
//! `JwtError`/`UserError` layering in `services/jwt.rs`), and every one of
//! them converts into [`GatewayErrorKind`], the standardized kind set a
//! caller-facing response is built from.

use thiserror::Error;

/// The standardized error-code kinds exposed to callers, independent of
/// which subsystem raised them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayErrorKind {
    Success,
    InvalidRequest,
    RoutingFailed,
    DecodeFailed,
    AuthFailed,
    NotFound,
    Timeout,
    Overloaded,
    StoreUnavailable,
    ServerError,
}

impl GatewayErrorKind {
    /// HTTP status used by the request/response transport's default mapping.
    pub fn http_status(self) -> u16 {
        match self {
            GatewayErrorKind::Success => 200,
            GatewayErrorKind::InvalidRequest => 400,
            GatewayErrorKind::RoutingFailed => 404,
            GatewayErrorKind::DecodeFailed => 400,
            GatewayErrorKind::AuthFailed => 401,
            GatewayErrorKind::NotFound => 404,
            GatewayErrorKind::Timeout => 504,
            GatewayErrorKind::Overloaded => 503,
            GatewayErrorKind::StoreUnavailable => 503,
            GatewayErrorKind::ServerError => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GatewayErrorKind::Success => "SUCCESS",
            GatewayErrorKind::InvalidRequest => "INVALID_REQUEST",
            GatewayErrorKind::RoutingFailed => "ROUTING_FAILED",
            GatewayErrorKind::DecodeFailed => "DECODE_FAILED",
            GatewayErrorKind::AuthFailed => "AUTH_FAILED",
            GatewayErrorKind::NotFound => "NOT_FOUND",
            GatewayErrorKind::Timeout => "TIMEOUT",
            GatewayErrorKind::Overloaded => "OVERLOADED",
            GatewayErrorKind::StoreUnavailable => "STORE_UNAVAILABLE",
            GatewayErrorKind::ServerError => "SERVER_ERROR",
        }
    }
}

/// Errors from the `KvStore` capability (§6 of the gateway design).
#[derive(Error, Debug)]
pub enum KvError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("malformed value at {0}: {1}")]
    Malformed(String, String),
}

impl From<&KvError> for GatewayErrorKind {
    fn from(e: &KvError) -> Self {
        match e {
            KvError::Unavailable(_) => GatewayErrorKind::StoreUnavailable,
            KvError::NotFound(_) => GatewayErrorKind::NotFound,
            KvError::Malformed(_, _) => GatewayErrorKind::ServerError,
        }
    }
}

/// Errors from the authentication core (C4).
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token signing failed: {0}")]
    Encoding(String),
    #[error("malformed token")]
    InvalidToken,
    #[error("token expired")]
    TokenExpired,
    #[error("token revoked")]
    TokenRevoked,
    #[error("device mismatch")]
    DeviceMismatch,
    #[error("unknown platform policy for {0}")]
    UnknownPlatform(String),
    #[error(transparent)]
    Store(#[from] KvError),
}

impl From<&AuthError> for GatewayErrorKind {
    fn from(e: &AuthError) -> Self {
        match e {
            AuthError::Encoding(_) => GatewayErrorKind::ServerError,
            AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::TokenRevoked
            | AuthError::DeviceMismatch
            | AuthError::UnknownPlatform(_) => GatewayErrorKind::AuthFailed,
            AuthError::Store(inner) => inner.into(),
        }
    }
}

/// Errors from the connection registry (C3).
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] KvError),
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

impl From<&RegistryError> for GatewayErrorKind {
    fn from(e: &RegistryError) -> Self {
        match e {
            RegistryError::Store(inner) => inner.into(),
            RegistryError::SessionNotFound(_) => GatewayErrorKind::NotFound,
        }
    }
}

/// Errors from the router (C5).
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("no route for {0} {1}")]
    NoRoute(String, String),
    #[error("no service covers cmd_id {0}")]
    NoService(u32),
}

impl From<&RouterError> for GatewayErrorKind {
    fn from(_: &RouterError) -> Self {
        GatewayErrorKind::RoutingFailed
    }
}

/// Errors from the message parser (C6).
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("empty method or path")]
    EmptyRequestLine,
    #[error("path does not begin with configured api_prefix")]
    PrefixMismatch,
    #[error("cmd_id is zero")]
    ZeroCmdId,
    #[error("body exceeds maximum frame size")]
    BodyTooLarge,
    #[error("header decode failed: {0}")]
    Decode(String),
    #[error(transparent)]
    Routing(#[from] RouterError),
}

impl From<&ParserError> for GatewayErrorKind {
    fn from(e: &ParserError) -> Self {
        match e {
            ParserError::EmptyRequestLine | ParserError::PrefixMismatch => {
                GatewayErrorKind::InvalidRequest
            }
            ParserError::ZeroCmdId | ParserError::Decode(_) | ParserError::BodyTooLarge => {
                GatewayErrorKind::DecodeFailed
            }
            ParserError::Routing(inner) => inner.into(),
        }
    }
}

/// Errors from the message processor (C7).
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("empty bearer token")]
    EmptyToken,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("unknown command: {0}")]
    UnknownCommand(u32),
    #[error("in-flight capacity exceeded")]
    Overloaded,
    #[error("handler deadline exceeded")]
    Timeout,
    #[error("handler failed: {0}")]
    HandlerFailed(String),
}

impl From<&ProcessorError> for GatewayErrorKind {
    fn from(e: &ProcessorError) -> Self {
        match e {
            ProcessorError::EmptyToken => GatewayErrorKind::AuthFailed,
            ProcessorError::Auth(inner) => inner.into(),
            ProcessorError::UnknownCommand(_) => GatewayErrorKind::NotFound,
            ProcessorError::Overloaded => GatewayErrorKind::Overloaded,
            ProcessorError::Timeout => GatewayErrorKind::Timeout,
            ProcessorError::HandlerFailed(_) => GatewayErrorKind::ServerError,
        }
    }
}
