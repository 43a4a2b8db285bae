pub mod policy;
pub mod route_table;

pub use policy::{Platform, PlatformPolicy, PlatformPolicyTable};
pub use route_table::{RouteConfig, ServiceEntry};

/// The auth core's config value (spec.md §6 "Config value"): the HMAC
/// signing secret plus the `iss`/`aud` the core stamps into and checks
/// against every access token.
#[derive(Debug, Clone)]
pub struct AuthSecrets {
    pub hmac_secret: String,
    pub issuer: String,
    pub audience: String,
}

impl AuthSecrets {
    pub fn new(
        hmac_secret: impl Into<String>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            hmac_secret: hmac_secret.into(),
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }
}
