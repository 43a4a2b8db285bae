//! Token claim and metadata shapes (spec.md §3 `AccessToken`/`RefreshToken`).

use serde::{Deserialize, Serialize};

use crate::config::Platform;

/// Claims embedded in the signed access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub aud: String,
    /// `user_id`.
    pub sub: String,
    pub jti: String,
    pub iat: u64,
    pub exp: u64,
    pub username: String,
    pub device_id: String,
    pub platform: String,
    #[serde(rename = "type")]
    pub token_type: String,
}

/// Server-side metadata for an opaque refresh token, stored at
/// `refresh:{token}` (spec.md §3 RegistryLayout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenMetadata {
    pub user_id: String,
    pub username: String,
    pub device_id: String,
    pub platform: String,
    pub issued_at: u64,
    pub expires_at: u64,
    pub jti: String,
    pub revoked: bool,
    pub last_used_at: Option<u64>,
}

/// The identity carried by a verified token, returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub user_id: String,
    pub username: String,
    pub device_id: String,
    pub platform: Platform,
}

/// Result of a `refresh_access_token` call: always a new access token,
/// and a new refresh token only when rotation fired.
#[derive(Debug, Clone)]
pub struct TokenResult {
    pub new_access_token: String,
    pub new_refresh_token: Option<String>,
}
