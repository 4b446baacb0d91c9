//! End-to-end call flow over loopback TCP and a shared in-memory registry:
//! discovery, selection, the wire round trip, and the fault-tolerance
//! policy chain working together.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use keel_client::{FallbackHandler, RuntimeContext, ServiceCaller};
use keel_common::config::RpcConfig;
use keel_common::protocol::{CallRequest, KeelError};
use keel_registry::{EndpointInfo, MemoryRegistry, MemoryStore, RegistryClient};
use keel_server::{RpcServer, RpcService, ServiceTable};

struct Calculator {
    calls: Arc<AtomicU32>,
}

impl RpcService for Calculator {
    fn invoke(
        &self,
        method: &str,
        _arg_types: &[String],
        args: &[Value],
    ) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match method {
            "add" => {
                let pair = match args {
                    [a, b] => a.as_i64().zip(b.as_i64()),
                    _ => None,
                };
                pair.map(|(a, b)| json!(a + b))
                    .ok_or_else(|| "add expects two integers".to_string())
            }
            "explode" => Err("kaboom".to_string()),
            other => Err(format!("unknown method: {}", other)),
        }
    }
}

/// Starts a calculator server on an ephemeral port and registers it in the
/// shared store under `calculator:1.0`.
async fn start_calculator(store: &MemoryStore, calls: Arc<AtomicU32>) -> std::net::SocketAddr {
    let services = Arc::new(ServiceTable::new());
    services.register("calculator", Arc::new(Calculator { calls }));

    let config = RpcConfig {
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        ..RpcConfig::default()
    };
    let (addr, _handle) = RpcServer::new(config, services).start().await.unwrap();

    let provider = MemoryRegistry::with_store(store.clone());
    provider
        .register(&EndpointInfo::new("calculator", "127.0.0.1", addr.port()))
        .await
        .unwrap();
    addr
}

/// Registers an endpoint that refuses connections.
async fn register_dead_endpoint(store: &MemoryStore) -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let provider = MemoryRegistry::with_store(store.clone());
    provider
        .register(&EndpointInfo::new("calculator", "127.0.0.1", port))
        .await
        .unwrap();
    port
}

fn caller_over(store: &MemoryStore, configure: impl FnOnce(&mut RpcConfig)) -> ServiceCaller {
    let mut config = RpcConfig::default();
    configure(&mut config);
    let registry = Arc::new(RegistryClient::Memory(MemoryRegistry::with_store(
        store.clone(),
    )));
    let context = RuntimeContext::build(config, registry).unwrap();
    ServiceCaller::new(context)
}

#[tokio::test]
async fn test_invoke_round_trip() {
    let store = MemoryStore::new();
    start_calculator(&store, Arc::new(AtomicU32::new(0))).await;

    let caller = caller_over(&store, |_| {});
    let result = caller
        .invoke("calculator", "add", vec![json!(2), json!(40)])
        .await
        .unwrap();
    assert_eq!(result, json!(42));
}

#[tokio::test]
async fn test_concurrent_invocations_stay_correlated() {
    let store = MemoryStore::new();
    start_calculator(&store, Arc::new(AtomicU32::new(0))).await;

    let caller = Arc::new(caller_over(&store, |_| {}));
    let invocations = (0..16).map(|i| {
        let caller = caller.clone();
        async move {
            let result = caller
                .invoke("calculator", "add", vec![json!(i), json!(i)])
                .await
                .unwrap();
            assert_eq!(result, json!(2 * i));
        }
    });
    futures::future::join_all(invocations).await;
}

#[tokio::test]
async fn test_remote_error_propagates_and_is_not_retried() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicU32::new(0));
    start_calculator(&store, calls.clone()).await;

    // Even with retries configured, a response carrying a remote error is a
    // transport-level success and must not be re-attempted.
    let caller = caller_over(&store, |config| {
        config.retry_strategy = "fixed_interval".to_string();
        config.retry.interval_ms = 10;
        config.retry.max_attempts = 3;
    });

    let err = caller
        .invoke("calculator", "explode", vec![])
        .await
        .unwrap_err();
    match err {
        KeelError::Remote(message) => assert!(message.contains("kaboom")),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_endpoint_available_fails_fast() {
    let store = MemoryStore::new();
    let caller = caller_over(&store, |_| {});

    let err = caller
        .invoke("calculator", "add", vec![json!(1), json!(1)])
        .await
        .unwrap_err();
    assert!(matches!(err, KeelError::NoEndpoint(_)));
}

#[tokio::test]
async fn test_failover_reaches_a_live_endpoint() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicU32::new(0));
    register_dead_endpoint(&store).await;
    start_calculator(&store, calls.clone()).await;

    let caller = caller_over(&store, |config| {
        config.tolerant_strategy = "fail_over".to_string();
    });

    // Whichever endpoint selection lands on, the call must end up on the
    // live server.
    let result = caller
        .invoke("calculator", "add", vec![json!(20), json!(22)])
        .await
        .unwrap();
    assert_eq!(result, json!(42));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failback_synthesizes_typed_default() {
    let store = MemoryStore::new();
    register_dead_endpoint(&store).await;

    let caller = caller_over(&store, |config| {
        config.tolerant_strategy = "fail_back".to_string();
    });

    let result = caller
        .invoke_typed("calculator", "is_ready", vec![], "bool")
        .await
        .unwrap();
    assert_eq!(result, json!(false));

    let result = caller
        .invoke("calculator", "whoami", vec![])
        .await
        .unwrap();
    assert_eq!(result, Value::Null);
}

#[tokio::test]
async fn test_failback_uses_the_fallback_handler() {
    struct StubCalculator;
    impl FallbackHandler for StubCalculator {
        fn handle(&self, request: &CallRequest) -> keel_common::Result<Value> {
            Ok(json!({"stubbed": request.method_name}))
        }
    }

    let store = MemoryStore::new();
    register_dead_endpoint(&store).await;

    let caller = caller_over(&store, |config| {
        config.tolerant_strategy = "fail_back".to_string();
    })
    .with_fallback(Arc::new(StubCalculator));

    let result = caller
        .invoke("calculator", "add", vec![json!(1), json!(2)])
        .await
        .unwrap();
    assert_eq!(result, json!({"stubbed": "add"}));
}

#[tokio::test]
async fn test_least_active_flow_releases_counters() {
    let store = MemoryStore::new();
    start_calculator(&store, Arc::new(AtomicU32::new(0))).await;

    let caller = caller_over(&store, |config| {
        config.load_balancer = "least_active".to_string();
    });

    for _ in 0..4 {
        caller
            .invoke("calculator", "add", vec![json!(1), json!(1)])
            .await
            .unwrap();
    }
    // If the release hook ever got lost, selection would still work, but
    // the invariant is checked directly in the balancer's own tests; this
    // exercises the guard through the real call path.
}
