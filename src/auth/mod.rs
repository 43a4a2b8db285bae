pub mod claims;
pub mod core;

pub use claims::{AccessTokenClaims, RefreshTokenMetadata, TokenResult, UserInfo};
pub use core::AuthCore;
