//! Centralized process configuration — loaded once at startup, mirroring
//! the teacher's "JavaScript-style config pattern: load ALL env vars ONCE"
//! (`once_cell::Lazy<AppConfig>`). This is the gateway's own `Config value`
//! (spec.md §6): it owns env/file parsing so the core components never do.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::config::{AuthSecrets, Platform, PlatformPolicy, PlatformPolicyTable, RouteConfig};
use crate::processor::ProcessingOptions;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("failed to read config file {0}: {1}")]
    FileRead(String, String),
    #[error("failed to parse config file {0}: {1}")]
    FileParse(String, String),
}

/// Global application configuration, loaded once at startup.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    #[cfg(test)]
    dotenv::dotenv().ok();

    AppConfig::from_env().expect("failed to load configuration")
});

pub fn config() -> &'static AppConfig {
    &CONFIG
}

/// Closed set of deployment environments, mirroring the teacher's
/// `Environment` enum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Staging,
    Production,
}

impl From<String> for Environment {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            "test" => Environment::Test,
            "staging" | "stage" => Environment::Staging,
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
        write!(f, "{}", s)
    }
}

/// Complete process configuration. Intentionally narrower than the
/// teacher's original (no Postgres/ClickHouse/email/bcrypt fields — this
/// process has no use for them); see `DESIGN.md` for the list of dropped
/// sections.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub rust_log: String,

    pub streaming_bind_address: String,
    pub streaming_port: u16,
    pub reqresp_bind_address: String,
    pub reqresp_port: u16,

    pub api_prefix: String,
    pub route_config_path: Option<String>,
    pub policy_config_path: Option<String>,

    pub jwt_hmac_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,

    pub cors_allowed_origins: Vec<String>,

    pub processor_timeout_secs: u64,
    pub processor_enable_concurrent_processing: bool,
    pub processor_max_concurrent_tasks: usize,
    pub processor_enable_request_logging: bool,
    pub processor_enable_performance_monitoring: bool,
}

fn env_or_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from(env_or_string("ENVIRONMENT", "development"));

        let jwt_hmac_secret = std::env::var("JWT_HMAC_SECRET")
            .map_err(|_| ConfigError::MissingVar("JWT_HMAC_SECRET".to_string()))?;
        if jwt_hmac_secret.len() < 32 {
            return Err(ConfigError::InvalidValue(
                "JWT_HMAC_SECRET".to_string(),
                "must be at least 32 bytes".to_string(),
            ));
        }

        let cors_allowed_origins = env_or_string("CORS_ALLOWED_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            environment,
            rust_log: env_or_string("RUST_LOG", "mychat_gateway_core=debug,axum=info,tower_http=info"),

            streaming_bind_address: env_or_string("STREAMING_BIND_ADDRESS", "0.0.0.0"),
            streaming_port: env_or("STREAMING_PORT", 7001u16),
            reqresp_bind_address: env_or_string("REQRESP_BIND_ADDRESS", "0.0.0.0"),
            reqresp_port: env_or("REQRESP_PORT", 7000u16),

            api_prefix: env_or_string("API_PREFIX", "/api/v1"),
            route_config_path: std::env::var("ROUTE_CONFIG_PATH").ok(),
            policy_config_path: std::env::var("POLICY_CONFIG_PATH").ok(),

            jwt_hmac_secret,
            jwt_issuer: env_or_string("JWT_ISSUER", "mychat-gateway"),
            jwt_audience: env_or_string("JWT_AUDIENCE", "mychat-clients"),

            cors_allowed_origins,

            processor_timeout_secs: env_or("PROCESSOR_TIMEOUT_SECS", 30),
            processor_enable_concurrent_processing: env_or("PROCESSOR_ENABLE_CONCURRENT_PROCESSING", true),
            processor_max_concurrent_tasks: env_or("PROCESSOR_MAX_CONCURRENT_TASKS", 512usize),
            processor_enable_request_logging: env_or("PROCESSOR_ENABLE_REQUEST_LOGGING", true),
            processor_enable_performance_monitoring: env_or("PROCESSOR_ENABLE_PERFORMANCE_MONITORING", true),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn streaming_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.streaming_bind_address, self.streaming_port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue("streaming address".to_string(), e.to_string()))
    }

    pub fn reqresp_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.reqresp_bind_address, self.reqresp_port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue("reqresp address".to_string(), e.to_string()))
    }

    pub fn auth_secrets(&self) -> AuthSecrets {
        AuthSecrets::new(self.jwt_hmac_secret.clone(), self.jwt_issuer.clone(), self.jwt_audience.clone())
    }

    pub fn processing_options(&self) -> ProcessingOptions {
        ProcessingOptions {
            timeout: Duration::from_secs(self.processor_timeout_secs),
            enable_concurrent_processing: self.processor_enable_concurrent_processing,
            max_concurrent_tasks: self.processor_max_concurrent_tasks,
            enable_request_logging: self.processor_enable_request_logging,
            enable_performance_monitoring: self.processor_enable_performance_monitoring,
        }
    }

    /// Loads the route table from `route_config_path` if set, else falls
    /// back to an empty table under `api_prefix` (an embedder with no
    /// routes configured yet can still start and add routes via `reload()`).
    pub fn load_route_config(&self) -> Result<RouteConfig, ConfigError> {
        let Some(path) = &self.route_config_path else {
            return Ok(RouteConfig::new(self.api_prefix.clone()));
        };
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.clone(), e.to_string()))?;
        let file: RouteConfigFile =
            serde_json::from_str(&raw).map_err(|e| ConfigError::FileParse(path.clone(), e.to_string()))?;
        Ok(file.into_route_config())
    }

    /// Loads per-platform policies from `policy_config_path` if set, else
    /// falls back to an empty table — every lookup then resolves through
    /// `PlatformPolicy::fallback()` (spec.md §3).
    pub fn load_platform_policies(&self) -> Result<PlatformPolicyTable, ConfigError> {
        let Some(path) = &self.policy_config_path else {
            return Ok(PlatformPolicyTable::new());
        };
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.clone(), e.to_string()))?;
        let entries: Vec<PlatformPolicyFileEntry> =
            serde_json::from_str(&raw).map_err(|e| ConfigError::FileParse(path.clone(), e.to_string()))?;

        let mut table = PlatformPolicyTable::new();
        for entry in entries {
            table = table.with_policy(Platform::from(entry.platform.as_str()), entry.into_policy());
        }
        Ok(table)
    }
}

#[derive(Debug, Deserialize)]
struct RouteConfigFile {
    api_prefix: String,
    #[serde(default)]
    routes: Vec<RouteEntryFile>,
    #[serde(default)]
    services: Vec<ServiceEntryFile>,
}

#[derive(Debug, Deserialize)]
struct RouteEntryFile {
    method: String,
    path: String,
    cmd_id: u32,
    service_name: String,
}

#[derive(Debug, Deserialize)]
struct ServiceEntryFile {
    name: String,
    endpoint: String,
    timeout_ms: u64,
    max_connections: u32,
    cmd_range: (u32, u32),
}

impl RouteConfigFile {
    fn into_route_config(self) -> RouteConfig {
        let mut config = RouteConfig::new(self.api_prefix);
        for route in self.routes {
            config = config.with_route(route.method, route.path, route.cmd_id, route.service_name);
        }
        for service in self.services {
            config = config.with_service(service.name, service.endpoint, service.timeout_ms, service.max_connections, service.cmd_range);
        }
        config
    }
}

#[derive(Debug, Deserialize)]
struct PlatformPolicyFileEntry {
    platform: String,
    access_ttl_seconds: u32,
    refresh_ttl_seconds: u32,
    allow_multi_device: bool,
    refresh_window_fraction: f32,
    auto_refresh_enabled: bool,
    max_refresh_retries: u32,
}

impl PlatformPolicyFileEntry {
    fn into_policy(self) -> PlatformPolicy {
        PlatformPolicy {
            access_ttl_seconds: self.access_ttl_seconds,
            refresh_ttl_seconds: self.refresh_ttl_seconds,
            allow_multi_device: self.allow_multi_device,
            refresh_window_fraction: self.refresh_window_fraction,
            auto_refresh_enabled: self.auto_refresh_enabled,
            max_refresh_retries: self.max_refresh_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parsing_falls_back_to_development() {
        assert_eq!(Environment::from("PRODUCTION".to_string()), Environment::Production);
        assert_eq!(Environment::from("nonsense".to_string()), Environment::Development);
    }

    #[test]
    fn route_config_file_builds_expected_tables() {
        let json = r#"{
            "api_prefix": "/api/v1",
            "routes": [{"method":"POST","path":"/message/send","cmd_id":2001,"service_name":"messaging"}],
            "services": [{"name":"messaging","endpoint":"http://messaging:9000","timeout_ms":3000,"max_connections":10,"cmd_range":[2000,2999]}]
        }"#;
        let file: RouteConfigFile = serde_json::from_str(json).unwrap();
        let config = file.into_route_config();
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.services.len(), 1);
    }
}
