use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mychat_gateway_core::app_config;
use mychat_gateway_core::db::{RedisConfig, RedisKvStore, RedisPool};
use mychat_gateway_core::{Gateway, KvStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Handle version flag for container health checks - must be FIRST
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "--version" {
        println!("mychat-gateway-core v{}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize centralized config (loads all env vars ONCE)
    let config = app_config::config();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.rust_log.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(environment = %config.environment, "=== STARTING GATEWAY CORE ===");

    let streaming_addr = config
        .streaming_addr()
        .context("invalid streaming bind address")?;
    let reqresp_addr = config
        .reqresp_addr()
        .context("invalid request/response bind address")?;

    info!("Initializing Redis pool...");
    let redis_config = RedisConfig::from_env();
    let kv: Arc<dyn KvStore> = match RedisPool::new(redis_config).await {
        Ok(pool) => {
            info!("Redis connection pool initialized successfully");
            Arc::new(RedisKvStore::new(pool))
        }
        Err(e) => {
            error!(error = %e, "failed to initialize Redis pool");
            return Err(e).context("Redis initialization failed");
        }
    };

    let policies = config
        .load_platform_policies()
        .context("failed to load platform policy config")?;
    let route_config = config
        .load_route_config()
        .context("failed to load route config")?;

    let gateway = Gateway::new(
        policies,
        route_config,
        config.auth_secrets(),
        kv,
        streaming_addr,
        reqresp_addr,
        config.processing_options(),
        config.cors_allowed_origins.clone(),
    );

    gateway.start().await?;
    info!(
        streaming_addr = %streaming_addr,
        reqresp_addr = %reqresp_addr,
        "gateway started"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining gateway");
    gateway.stop().await;

    Ok(())
}
