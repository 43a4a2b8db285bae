// Seed end-to-end scenarios from the gateway's testable-properties list:
// auth success/invalid/missing-device, routing miss, backpressure,
// same-platform kick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mychat_gateway_core::db::InMemoryKvStore;
use mychat_gateway_core::parser::reqresp::ReqrespInput;
use mychat_gateway_core::processor::{HandlerResult, ProcessingOptions};
use mychat_gateway_core::{
    AuthCore, AuthSecrets, ConnectionRegistry, MessageParser, Platform, PlatformPolicy,
    PlatformPolicyTable, Processor, RouteConfig, Router,
};

fn secrets() -> AuthSecrets {
    AuthSecrets::new("s-at-least-32-bytes-long-for-hs256!!", "gateway", "clients")
}

fn route_config() -> RouteConfig {
    RouteConfig::new("/api/v1")
        .with_route("POST", "/message/send", 2001, "messaging")
        .with_service("messaging", "http://messaging:9000", 3000, 10, (2000, 2999))
}

async fn mint(auth: &AuthCore, user: &str, device: &str, platform: Platform) -> String {
    auth.generate_access_token(user, "alice", device, platform, None)
        .expect("mint access token")
}

struct Harness {
    auth: Arc<AuthCore>,
    router: Arc<Router>,
    parser: MessageParser,
    processor: Processor,
}

fn harness(options: ProcessingOptions) -> Harness {
    let kv = Arc::new(InMemoryKvStore::new());
    let auth = Arc::new(AuthCore::new(kv, secrets(), PlatformPolicyTable::new()));
    let router = Arc::new(Router::new(route_config()));
    let processor = Processor::new(auth.clone(), router.clone(), options);
    Harness {
        auth,
        router,
        parser: MessageParser::new(),
        processor,
    }
}

fn send_input<'a>(
    token: &'a str,
    device_id: Option<&'a str>,
    path: &'a str,
    body: &'a [u8],
) -> ReqrespInput<'a> {
    let mut headers = HashMap::new();
    headers.insert("authorization".to_string(), format!("Bearer {}", token));
    headers.insert("x-platform".to_string(), "web".to_string());
    headers.insert("content-type".to_string(), "application/json".to_string());
    if let Some(device_id) = device_id {
        headers.insert("x-device-id".to_string(), device_id.to_string());
    }
    ReqrespInput {
        method: "POST",
        path,
        headers,
        body,
        query: HashMap::new(),
        session_id: None,
        client_ip: "127.0.0.1",
        received_at: 0,
    }
}

#[tokio::test]
async fn auth_success_reaches_registered_handler() {
    let h = harness(ProcessingOptions::default());
    let token = mint(&h.auth, "u1", "d1", Platform::Web).await;

    h.processor.register(
        2001,
        Arc::new(|_msg: &mychat_gateway_core::UnifiedMessage| {
            Box::pin(async { HandlerResult::ok_json(r#"{"ok":true}"#) })
                as std::pin::Pin<Box<dyn std::future::Future<Output = HandlerResult> + Send>>
        }),
    );

    let body = br#"{"from_uid":"u1","to_uid":"u1","text":"hi"}"#;
    let input = send_input(&token, Some("d1"), "/api/v1/message/send", body);
    let msg = h.parser.parse_reqresp(&h.router, input).expect("parses");

    let result = h.processor.process(&msg).await.expect("handler runs");
    assert_eq!(result.status_code, 200);
    assert_eq!(result.json_body, r#"{"ok":true}"#);
}

#[tokio::test]
async fn auth_invalid_token_is_rejected() {
    let h = harness(ProcessingOptions::default());
    h.processor.register(
        2001,
        Arc::new(|_msg: &mychat_gateway_core::UnifiedMessage| {
            Box::pin(async { HandlerResult::ok_json("{}") })
                as std::pin::Pin<Box<dyn std::future::Future<Output = HandlerResult> + Send>>
        }),
    );

    let body = br#"{"from_uid":"u1","to_uid":"u1","text":"hi"}"#;
    let input = send_input("invalid", Some("d1"), "/api/v1/message/send", body);
    let msg = h.parser.parse_reqresp(&h.router, input).expect("parses");

    let err = h.processor.process(&msg).await.expect_err("token is garbage");
    assert!(matches!(err, mychat_gateway_core::error::ProcessorError::Auth(_)));
}

#[tokio::test]
async fn missing_device_id_fails_device_binding() {
    let h = harness(ProcessingOptions::default());
    let token = mint(&h.auth, "u1", "d1", Platform::Web).await;
    h.processor.register(
        2001,
        Arc::new(|_msg: &mychat_gateway_core::UnifiedMessage| {
            Box::pin(async { HandlerResult::ok_json("{}") })
                as std::pin::Pin<Box<dyn std::future::Future<Output = HandlerResult> + Send>>
        }),
    );

    let body = br#"{"from_uid":"u1","to_uid":"u1","text":"hi"}"#;
    let input = send_input(&token, None, "/api/v1/message/send", body);
    let msg = h.parser.parse_reqresp(&h.router, input).expect("parses");

    let err = h.processor.process(&msg).await.expect_err("device mismatch");
    assert!(matches!(err, mychat_gateway_core::error::ProcessorError::Auth(_)));
}

#[tokio::test]
async fn routing_miss_is_reported_before_auth() {
    let h = harness(ProcessingOptions::default());
    let token = mint(&h.auth, "u1", "d1", Platform::Web).await;

    let input = send_input(&token, Some("d1"), "/api/v1/no/such/path", b"{}");
    let result = h.parser.parse_reqresp(&h.router, input);
    assert!(result.is_err());
}

#[tokio::test]
async fn backpressure_rejects_the_kplus1th_concurrent_call() {
    let mut options = ProcessingOptions::default();
    options.max_concurrent_tasks = 2;
    let h = harness(options);
    let token = mint(&h.auth, "u1", "d1", Platform::Web).await;

    h.processor.register(
        2001,
        Arc::new(|_msg: &mychat_gateway_core::UnifiedMessage| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                HandlerResult::ok_json("{}")
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = HandlerResult> + Send>>
        }),
    );

    let body = br#"{"from_uid":"u1","to_uid":"u1","text":"hi"}"#;
    let msgs: Vec<_> = (0..3)
        .map(|_| {
            let input = send_input(&token, Some("d1"), "/api/v1/message/send", body);
            h.parser.parse_reqresp(&h.router, input).expect("parses")
        })
        .collect();

    let processor = &h.processor;
    let (r1, r2, r3) = tokio::join!(
        processor.process(&msgs[0]),
        processor.process(&msgs[1]),
        processor.process(&msgs[2]),
    );

    let overloaded = [&r1, &r2, &r3]
        .iter()
        .filter(|r| matches!(r, Err(mychat_gateway_core::error::ProcessorError::Overloaded)))
        .count();
    let ok = [&r1, &r2, &r3].iter().filter(|r| r.is_ok()).count();
    assert_eq!(overloaded, 1);
    assert_eq!(ok, 2);
}

#[tokio::test]
async fn same_platform_kick_closes_the_prior_session() {
    let kv = Arc::new(InMemoryKvStore::new());
    let policies = PlatformPolicyTable::new().with_policy(
        Platform::Ios,
        PlatformPolicy {
            access_ttl_seconds: 300,
            refresh_ttl_seconds: 3600,
            allow_multi_device: false,
            refresh_window_fraction: 0.2,
            auto_refresh_enabled: true,
            max_refresh_retries: 3,
        },
    );

    struct Recorder {
        closed: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl mychat_gateway_core::registry::SessionCloser for Recorder {
        async fn close(&self, session_id: &str) {
            self.closed.lock().unwrap().push(session_id.to_string());
        }
    }

    let recorder = Arc::new(Recorder {
        closed: std::sync::Mutex::new(Vec::new()),
    });
    let registry = ConnectionRegistry::new(kv, policies, recorder.clone());

    registry.add("u", "d1", Platform::Ios, "s1", 0, None).await.unwrap();
    let result = registry.add("u", "d2", Platform::Ios, "s2", 0, None).await.unwrap();

    assert_eq!(result.kicked_session_id.as_deref(), Some("s1"));
    assert_eq!(recorder.closed.lock().unwrap().as_slice(), &["s1".to_string()]);
    assert!(registry.lookup("u", "d1", Platform::Ios).await.unwrap().is_none());
    assert!(registry.lookup("u", "d2", Platform::Ios).await.unwrap().is_some());
}
