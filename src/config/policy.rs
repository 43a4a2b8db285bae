//! Platform identity and per-platform token/session policy (spec.md §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed set of client families. String parsing is case-insensitive;
/// anything unrecognized maps to `Unknown` rather than failing, mirroring
/// `get_platform_type()` in the original's `multi_platform_auth.hpp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Web,
    Miniapp,
    Ios,
    Android,
    Desktop,
    Mobile,
    Unknown,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Web => "web",
            Platform::Miniapp => "miniapp",
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Desktop => "desktop",
            Platform::Mobile => "mobile",
            Platform::Unknown => "unknown",
        }
    }
}

impl From<&str> for Platform {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "web" => Platform::Web,
            "miniapp" | "mini_app" | "mini-app" => Platform::Miniapp,
            "ios" => Platform::Ios,
            "android" => Platform::Android,
            "desktop" => Platform::Desktop,
            "mobile" => Platform::Mobile,
            _ => Platform::Unknown,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-platform configuration, loaded once and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformPolicy {
    pub access_ttl_seconds: u32,
    pub refresh_ttl_seconds: u32,
    /// If false, a new login evicts the prior same-platform session.
    pub allow_multi_device: bool,
    /// Remaining/total refresh lifetime fraction below which a refresh
    /// triggers rotation.
    pub refresh_window_fraction: f32,
    pub auto_refresh_enabled: bool,
    pub max_refresh_retries: u32,
}

impl PlatformPolicy {
    /// A conservative default used for platforms absent from the table.
    pub fn fallback() -> Self {
        Self {
            access_ttl_seconds: 900,
            refresh_ttl_seconds: 7 * 24 * 3600,
            allow_multi_device: true,
            refresh_window_fraction: 0.2,
            auto_refresh_enabled: true,
            max_refresh_retries: 3,
        }
    }
}

/// Config value handed to the auth core and registry at construction time
/// (spec.md §6 "Config value" — no env/file parsing inside the core).
#[derive(Debug, Clone, Default)]
pub struct PlatformPolicyTable {
    policies: HashMap<Platform, PlatformPolicy>,
}

impl PlatformPolicyTable {
    pub fn new() -> Self {
        Self {
            policies: HashMap::new(),
        }
    }

    pub fn with_policy(mut self, platform: Platform, policy: PlatformPolicy) -> Self {
        self.policies.insert(platform, policy);
        self
    }

    /// Returns the configured policy for `platform`, or
    /// [`PlatformPolicy::fallback`] if the table has no entry for it.
    pub fn get(&self, platform: Platform) -> PlatformPolicy {
        self.policies
            .get(&platform)
            .cloned()
            .unwrap_or_else(PlatformPolicy::fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parsing_is_case_insensitive_and_falls_back() {
        assert_eq!(Platform::from("IOS"), Platform::Ios);
        assert_eq!(Platform::from("Android"), Platform::Android);
        assert_eq!(Platform::from("xbox"), Platform::Unknown);
    }

    #[test]
    fn missing_platform_uses_fallback_policy() {
        let table = PlatformPolicyTable::new();
        let policy = table.get(Platform::Web);
        assert!(policy.allow_multi_device);
    }
}
