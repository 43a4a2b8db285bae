// Library exports for the gateway core.
// This file exposes modules and functions for library consumers.

pub mod app_config;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod parser;
pub mod processor;
pub mod registry;
pub mod router;
pub mod transport;
pub mod utils;

// Re-export CONFIG for use in other modules
pub use app_config::{config, AppConfig, Environment, CONFIG};

pub use auth::{AuthCore, UserInfo};
pub use config::{AuthSecrets, Platform, PlatformPolicy, PlatformPolicyTable, RouteConfig};
pub use db::{InMemoryKvStore, KvStore, RedisKvStore, RedisConfig, RedisPool};
pub use error::{AuthError, GatewayErrorKind};
pub use gateway::{Gateway, GatewayStats};
pub use parser::{MessageParser, UnifiedHeader, UnifiedMessage};
pub use processor::{HandlerFn, HandlerResult, ProcessingOptions, Processor, RegisterOutcome};
pub use registry::{ConnectionRegistry, DeviceSession};
pub use router::Router;
pub use transport::{Session, Transport};
