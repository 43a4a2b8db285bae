//! Gateway façade (C8): wires C1…C7 together and owns their lifetimes.
//! Grounded on the teacher's `main.rs` wiring (`AppState` assembly, axum
//! `Router` construction, graceful-shutdown-on-signal pattern) and
//! `examples/original_source/gateway/gateway_server/gateway_server.hpp`'s
//! start/stop/register_handler/push_to_user surface.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{any, get};
use axum::Router as AxumRouter;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::auth::AuthCore;
use crate::config::{AuthSecrets, PlatformPolicyTable, RouteConfig};
use crate::db::KvStore;
use crate::middleware::cors::cors_layer;
use crate::parser::MessageParser;
use crate::processor::{HandlerFn, ProcessingOptions, Processor, RegisterOutcome};
use crate::registry::{ConnectionRegistry, NoopCloser};
use crate::router::{Router, RouterStats};
use crate::transport::{http as transport_http, ws as transport_ws, Transport};

/// Observability snapshot for `Gateway::stats()` (spec.md §4.7).
/// `generated_at` is an RFC3339 timestamp, matching the teacher's
/// `chrono::Utc::now().to_rfc3339()` health-check banner in `main.rs`.
#[derive(Debug, Clone, Default)]
pub struct GatewayStats {
    pub online_users: u64,
    pub live_sessions: usize,
    pub router: RouterStats,
    pub processor: crate::processor::ProcessorMetricsSnapshot,
    pub parser: ParserCounters,
    pub generated_at: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParserCounters {
    pub requests_parsed: u64,
    pub frames_parsed: u64,
    pub routing_failures: u64,
    pub decode_failures: u64,
}

struct RunningHandles {
    streaming: JoinHandle<()>,
    reqresp: JoinHandle<()>,
}

/// Wires the registry (C3), auth core (C4), router (C5), parser (C6), and
/// processor (C7) into one process, and owns the transport (C1/C2).
/// Constructed once from three configuration inputs (spec.md §4.7):
/// platform policies, router config, and an auth secret source — plus the
/// two listen addresses and the shared `KvStore`.
pub struct Gateway {
    pub auth: Arc<AuthCore>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<Router>,
    pub parser: Arc<MessageParser>,
    pub processor: Arc<Processor>,
    pub transport: Arc<Transport>,
    streaming_addr: SocketAddr,
    reqresp_addr: SocketAddr,
    cors_allowed_origins: Vec<String>,
    running: AtomicBool,
    handles: Mutex<Option<RunningHandles>>,
}

impl Gateway {
    pub fn new(
        policies: PlatformPolicyTable,
        route_config: RouteConfig,
        auth_secrets: AuthSecrets,
        kv: Arc<dyn KvStore>,
        streaming_addr: SocketAddr,
        reqresp_addr: SocketAddr,
        processor_options: ProcessingOptions,
        cors_allowed_origins: Vec<String>,
    ) -> Arc<Self> {
        let transport = Arc::new(Transport::new());
        let router = Arc::new(Router::new(route_config));
        let auth = Arc::new(AuthCore::new(kv.clone(), auth_secrets, policies.clone()));
        let registry = Arc::new(ConnectionRegistry::new(kv, policies, transport.clone()));
        let parser = Arc::new(MessageParser::new());
        let processor = Arc::new(Processor::new(auth.clone(), router.clone(), processor_options));

        Arc::new(Self {
            auth,
            registry,
            router,
            parser,
            processor,
            transport,
            streaming_addr,
            reqresp_addr,
            cors_allowed_origins,
            running: AtomicBool::new(false),
            handles: Mutex::new(None),
        })
    }

    /// Registers a handler with the processor (spec.md §4.7): "delegates to
    /// the processor". Re-registration after `start()` is not supported by
    /// this façade, per spec.md §6, though the processor itself has no such
    /// restriction.
    pub fn register_handler(&self, cmd_id: u32, func: HandlerFn) -> RegisterOutcome {
        if self.running.load(Ordering::Acquire) {
            warn!(cmd_id, "register_handler called after start(); ignoring");
            return RegisterOutcome::Invalid;
        }
        self.processor.register(cmd_id, func)
    }

    /// Binds both listeners and begins accept loops. Idempotent when
    /// already running (spec.md §4.7).
    pub async fn start(self: &Arc<Self>) -> std::io::Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let cors = cors_layer(&self.cors_allowed_origins);

        let streaming_app: AxumRouter = AxumRouter::new()
            .route("/ws", get(transport_ws::upgrade))
            .layer(cors.clone())
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(self.clone());

        let reqresp_app: AxumRouter = AxumRouter::new()
            .fallback(any(transport_http::handler))
            .layer(cors)
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(self.clone());

        let streaming_listener = TcpListener::bind(self.streaming_addr).await?;
        let reqresp_listener = TcpListener::bind(self.reqresp_addr).await?;

        info!(addr = %self.streaming_addr, "streaming endpoint listening");
        info!(addr = %self.reqresp_addr, "request/response endpoint listening");

        let streaming = tokio::spawn(async move {
            let _ = axum::serve(
                streaming_listener,
                streaming_app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });
        let reqresp = tokio::spawn(async move {
            let _ = axum::serve(
                reqresp_listener,
                reqresp_app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });

        *self.handles.lock().await = Some(RunningHandles { streaming, reqresp });
        Ok(())
    }

    /// Refuses new connections, cancels the accept loops, drains in-flight
    /// handlers up to a grace window, then closes remaining sessions
    /// (spec.md §4.7 / §5 "`stop()` is the single cancellation root").
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(handles) = self.handles.lock().await.take() {
            handles.streaming.abort();
            handles.reqresp.abort();
        }

        let grace = Duration::from_secs(5);
        let deadline = tokio::time::Instant::now() + grace;
        while self.processor.in_flight() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.transport.close_all().await;
        info!("gateway stopped");
    }

    /// `push_to_user`'s full semantics (spec.md §4.2/§4.7): looks up every
    /// live session for `user_id` via the registry and attempts local
    /// delivery to each through the transport. Returns `true` if at least
    /// one session accepted the bytes.
    pub async fn push_to_user(&self, user_id: &str, bytes: Vec<u8>) -> bool {
        let sessions = match self.registry.list_user_sessions(user_id).await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(user_id, error = %e, "push_to_user: registry lookup failed");
                return false;
            }
        };

        let mut delivered = false;
        for session in sessions {
            if self.transport.send_to_session(&session.session_id, bytes.clone()).await {
                delivered = true;
            }
        }
        delivered
    }

    pub async fn online_count(&self) -> u64 {
        self.registry.online_count().await.unwrap_or(0)
    }

    pub async fn stats(&self) -> GatewayStats {
        let parser_stats = self.parser.stats();
        GatewayStats {
            online_users: self.online_count().await,
            live_sessions: self.transport.session_count().await,
            router: self.router.stats(),
            processor: self.processor.metrics(),
            parser: ParserCounters {
                requests_parsed: parser_stats.requests_parsed,
                frames_parsed: parser_stats.frames_parsed,
                routing_failures: parser_stats.routing_failures,
                decode_failures: parser_stats.decode_failures,
            },
            generated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// A `Gateway` whose connection registry closes kicked sessions through a
/// no-op (used by embedders that run a single-node deployment without a
/// shared `KvStore` and don't need cross-node kick delivery). Kept as a
/// documented escape hatch rather than a silent default — production
/// construction always goes through [`Gateway::new`], which wires the
/// transport itself as the closer.
pub fn noop_closer() -> Arc<NoopCloser> {
    Arc::new(NoopCloser)
}
