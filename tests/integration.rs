//! Integration tests for beacon-rpc.
//!
//! These tests run providers and callers over real TCP connections, with
//! discovery through the in-memory store or the TCP coordination service.

use std::sync::Arc;
use std::time::Duration;

use beacon_rpc::codec::MsgPackCodec;
use beacon_rpc::protocol::{errcode, read_frame, write_request, ErrorEnvelope};
use beacon_rpc::registry::{
    CoordinatorServer, Endpoint, MemoryRegistry, NodeStore, Registry, RemoteRegistry,
};
use beacon_rpc::service::DispatchTable;
use beacon_rpc::transport::connect;
use beacon_rpc::{
    FailureKind, MethodError, RegistryError, ResultCode, RpcChannel, RpcController, RpcError,
    RpcProvider, ServiceDescriptor, ServiceStub,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

const SECOND: Duration = Duration::from_secs(1);
const MAX_FRAME: u32 = 1024 * 1024;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LoginRequest {
    name: String,
    pwd: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LoginResponse {
    result: ResultCode,
    success: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct RegisterRequest {
    id: u32,
    name: String,
    pwd: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct RegisterResponse {
    result: ResultCode,
    success: bool,
}

async fn login(request: LoginRequest) -> Result<LoginResponse, MethodError> {
    Ok(LoginResponse {
        result: ResultCode::ok(),
        success: request.name == "zhangsan" && request.pwd == "123456",
    })
}

async fn double(n: i64) -> Result<i64, MethodError> {
    tokio::time::sleep(Duration::from_millis((n % 5) as u64)).await;
    Ok(n * 2)
}

async fn boom(_n: u32) -> Result<u32, MethodError> {
    panic!("handler bug");
}

fn user_service() -> ServiceDescriptor {
    ServiceDescriptor::new("UserService").method("Login", login)
}

async fn start_provider(store: &Arc<NodeStore>, services: Vec<ServiceDescriptor>) -> RpcProvider {
    let mut builder = RpcProvider::builder()
        .registry(Arc::new(MemoryRegistry::attach(store.clone())));
    for service in services {
        builder = builder.service(service);
    }
    builder.start("127.0.0.1:0").await.unwrap()
}

fn stub_for(store: &Arc<NodeStore>, service: &str) -> ServiceStub {
    let registry = Arc::new(MemoryRegistry::attach(store.clone()));
    ServiceStub::new(Arc::new(RpcChannel::new(registry)), service)
}

fn login_request() -> LoginRequest {
    LoginRequest {
        name: "zhangsan".to_string(),
        pwd: "123456".to_string(),
    }
}

async fn raw_connection(provider: &RpcProvider) -> TcpStream {
    connect(&Endpoint::from(provider.local_addr()), SECOND)
        .await
        .unwrap()
}

/// Login succeeds end to end.
#[tokio::test]
async fn test_login_end_to_end() {
    let store = Arc::new(NodeStore::new());
    let provider = start_provider(&store, vec![user_service()]).await;
    let stub = stub_for(&store, "UserService");

    let mut controller = RpcController::new();
    let response: LoginResponse = stub.call("Login", &login_request(), &mut controller).await;

    assert!(!controller.failed(), "{}", controller.error_text());
    assert!(response.result.is_ok());
    assert!(response.success);

    provider.shutdown().await.unwrap();
}

/// A method the provider lacks comes back as a delivered error response.
#[tokio::test]
async fn test_missing_method_is_a_delivered_error() {
    let store = Arc::new(NodeStore::new());
    let provider = start_provider(&store, vec![user_service()]).await;

    // Someone else advertises Register at this provider's address
    let other = MemoryRegistry::attach(store.clone());
    other
        .register("UserService", "Register", provider.endpoint())
        .await
        .unwrap();

    let stub = stub_for(&store, "UserService");
    let request = RegisterRequest {
        id: 10001,
        name: "zhangsan".to_string(),
        pwd: "123456".to_string(),
    };
    let mut controller = RpcController::new();
    let response: RegisterResponse = stub.call("Register", &request, &mut controller).await;

    assert!(!controller.failed());
    assert_eq!(response.result.errcode, errcode::METHOD_NOT_FOUND);
    assert!(response.result.errmsg.contains("not found"));
    assert!(!response.success);

    provider.shutdown().await.unwrap();
}

/// Calling a method nobody registered fails the controller with "not found".
#[tokio::test]
async fn test_unregistered_method_fails_lookup() {
    let store = Arc::new(NodeStore::new());
    let provider = start_provider(&store, vec![user_service()]).await;
    let stub = stub_for(&store, "UserService");

    let mut controller = RpcController::new();
    let response: RegisterResponse = stub
        .call("Register", &RegisterRequest::default(), &mut controller)
        .await;

    assert!(controller.failed());
    assert!(controller.error_text().contains("not found"));
    assert_eq!(controller.failure_kind(), Some(FailureKind::RegistryNotFound));
    assert!(!controller.is_retryable());
    assert!(!response.success);

    provider.shutdown().await.unwrap();
}

/// Lookup before any provider registered.
#[tokio::test]
async fn test_lookup_before_registration() {
    let registry = MemoryRegistry::new();
    let err = registry
        .lookup("FriendService", "GetFriendsList")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::NotFound("/FriendService/GetFriendsList".to_string())
    );
    assert!(err.to_string().contains("not found"));
}

/// Remote dispatch returns exactly what in-process dispatch returns.
#[tokio::test]
async fn test_dispatch_is_transparent() {
    let store = Arc::new(NodeStore::new());
    let provider = start_provider(&store, vec![user_service()]).await;
    let registry = Arc::new(MemoryRegistry::attach(store.clone()));
    let channel = RpcChannel::new(registry);
    let table = DispatchTable::new([user_service()]);

    for request in [
        login_request(),
        LoginRequest {
            name: "lisi".to_string(),
            pwd: "wrong".to_string(),
        },
    ] {
        let payload = MsgPackCodec::encode(&request).unwrap();

        let mut controller = RpcController::new();
        let remote = channel
            .call("UserService", "Login", &payload, &mut controller)
            .await;
        let local = table
            .dispatch("UserService", "Login", Bytes::from(payload))
            .await
            .unwrap();

        assert!(!controller.failed());
        assert_eq!(&remote[..], &local[..]);
    }

    provider.shutdown().await.unwrap();
}

/// Concurrent callers each get their own answer.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_no_cross_talk() {
    let store = Arc::new(NodeStore::new());
    let math = ServiceDescriptor::new("Math").method("Double", double);
    let provider = start_provider(&store, vec![math, user_service()]).await;
    let stub = stub_for(&store, "Math");

    let mut tasks = Vec::new();
    for n in 0..64i64 {
        let stub = stub.clone();
        tasks.push(tokio::spawn(async move {
            let mut controller = RpcController::new();
            let doubled: i64 = stub.call("Double", &n, &mut controller).await;
            assert!(!controller.failed(), "{}", controller.error_text());
            (n, doubled)
        }));
    }

    for task in tasks {
        let (n, doubled) = task.await.unwrap();
        assert_eq!(doubled, n * 2);
    }
    assert_eq!(provider.dispatch_table().len(), 2);

    provider.shutdown().await.unwrap();
}

/// Shutting the provider down removes its registry entries.
#[tokio::test]
async fn test_shutdown_removes_entries() {
    let store = Arc::new(NodeStore::new());
    let provider = start_provider(&store, vec![user_service()]).await;
    let caller = MemoryRegistry::attach(store.clone());

    assert_eq!(
        caller.lookup("UserService", "Login").await.unwrap(),
        *provider.endpoint()
    );

    provider.shutdown().await.unwrap();
    assert!(matches!(
        caller.lookup("UserService", "Login").await,
        Err(RegistryError::NotFound(_))
    ));
}

/// End to end through the TCP coordination service; a provider that goes
/// away without a graceful shutdown disappears once its session ends.
#[tokio::test]
async fn test_remote_registry_end_to_end() {
    let coordinator = CoordinatorServer::new(Duration::from_millis(300))
        .bind("127.0.0.1:0")
        .await
        .unwrap();

    let session_timeout = Duration::from_millis(300);
    let provider_registry =
        RemoteRegistry::connect(&coordinator.endpoint(), session_timeout, SECOND)
            .await
            .unwrap();
    let provider = RpcProvider::builder()
        .service(user_service())
        .registry(Arc::new(provider_registry))
        .start("127.0.0.1:0")
        .await
        .unwrap();

    let caller_registry: Arc<dyn Registry> = Arc::new(
        RemoteRegistry::connect(&coordinator.endpoint(), session_timeout, SECOND)
            .await
            .unwrap(),
    );
    let stub = ServiceStub::new(
        Arc::new(RpcChannel::new(caller_registry.clone())),
        "UserService",
    );

    // Idle longer than the session timeout; heartbeats keep the entry alive
    tokio::time::sleep(Duration::from_millis(700)).await;

    let mut controller = RpcController::new();
    let response: LoginResponse = stub.call("Login", &login_request(), &mut controller).await;
    assert!(!controller.failed(), "{}", controller.error_text());
    assert!(response.success);

    // Drop without shutdown: the session connection closes with it
    drop(provider);

    let mut gone = false;
    for _ in 0..100 {
        if let Err(RegistryError::NotFound(_)) = caller_registry.lookup("UserService", "Login").await
        {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone, "ephemeral entry outlived the provider session");

    caller_registry.close().await;
    coordinator.shutdown().await;
}

/// A second provider cannot take over a method held by a live one.
#[tokio::test]
async fn test_second_provider_start_is_fatal() {
    let coordinator = CoordinatorServer::new(SECOND)
        .bind("127.0.0.1:0")
        .await
        .unwrap();

    let first = RpcProvider::builder()
        .service(user_service())
        .registry(Arc::new(
            RemoteRegistry::connect(&coordinator.endpoint(), SECOND, SECOND)
                .await
                .unwrap(),
        ))
        .start("127.0.0.1:0")
        .await
        .unwrap();

    let err = RpcProvider::builder()
        .service(user_service())
        .registry(Arc::new(
            RemoteRegistry::connect(&coordinator.endpoint(), SECOND, SECOND)
                .await
                .unwrap(),
        ))
        .start("127.0.0.1:0")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RpcError::Registry(RegistryError::NodeExists(_))
    ));

    first.shutdown().await.unwrap();
    coordinator.shutdown().await;
}

/// A panicking handler costs its connection only.
#[tokio::test]
async fn test_handler_panic_is_isolated() {
    let store = Arc::new(NodeStore::new());
    let faulty = ServiceDescriptor::new("Faulty").method("Boom", boom);
    let provider = start_provider(&store, vec![faulty, user_service()]).await;

    let mut controller = RpcController::new();
    let _: u32 = stub_for(&store, "Faulty")
        .call("Boom", &1u32, &mut controller)
        .await;
    assert!(controller.failed());

    let mut controller = RpcController::new();
    let response: LoginResponse = stub_for(&store, "UserService")
        .call("Login", &login_request(), &mut controller)
        .await;
    assert!(!controller.failed(), "{}", controller.error_text());
    assert!(response.success);

    provider.shutdown().await.unwrap();
}

/// After a dispatch miss the same connection serves the next request.
#[tokio::test]
async fn test_connection_survives_dispatch_miss() {
    let store = Arc::new(NodeStore::new());
    let provider = start_provider(&store, vec![user_service()]).await;
    let mut stream = raw_connection(&provider).await;

    let payload = MsgPackCodec::encode(&RegisterRequest::default()).unwrap();
    write_request(&mut stream, "UserService", "Register", &payload)
        .await
        .unwrap();
    let body = read_frame(&mut stream, MAX_FRAME).await.unwrap().unwrap();
    let envelope: ErrorEnvelope = MsgPackCodec::decode(&body).unwrap();
    assert_ne!(envelope.result.errcode, errcode::OK);
    assert!(!envelope.result.errmsg.is_empty());

    write_request(&mut stream, "NoSuchService", "Login", &payload)
        .await
        .unwrap();
    let body = read_frame(&mut stream, MAX_FRAME).await.unwrap().unwrap();
    let envelope: ErrorEnvelope = MsgPackCodec::decode(&body).unwrap();
    assert_eq!(envelope.result.errcode, errcode::SERVICE_NOT_FOUND);

    let payload = MsgPackCodec::encode(&login_request()).unwrap();
    write_request(&mut stream, "UserService", "Login", &payload)
        .await
        .unwrap();
    let body = read_frame(&mut stream, MAX_FRAME).await.unwrap().unwrap();
    let response: LoginResponse = MsgPackCodec::decode(&body).unwrap();
    assert!(response.success);

    provider.shutdown().await.unwrap();
}

/// A malformed frame closes that connection and nothing else.
#[tokio::test]
async fn test_malformed_frame_closes_only_its_connection() {
    let store = Arc::new(NodeStore::new());
    let provider = start_provider(&store, vec![user_service()]).await;

    let mut bad = raw_connection(&provider).await;
    bad.write_all(&[0, 0, 0, 3, 0xc1, 0xc1, 0xc1]).await.unwrap();
    let reply = read_frame(&mut bad, MAX_FRAME).await;
    assert!(!matches!(reply, Ok(Some(_))));

    let mut controller = RpcController::new();
    let response: LoginResponse = stub_for(&store, "UserService")
        .call("Login", &login_request(), &mut controller)
        .await;
    assert!(!controller.failed(), "{}", controller.error_text());
    assert!(response.success);

    provider.shutdown().await.unwrap();
}

/// Oversized payload declarations are rejected before any allocation.
#[tokio::test]
async fn test_payload_limit() {
    let store = Arc::new(NodeStore::new());
    let provider = RpcProvider::builder()
        .service(user_service())
        .registry(Arc::new(MemoryRegistry::attach(store.clone())))
        .max_payload_size(16)
        .start("127.0.0.1:0")
        .await
        .unwrap();

    let mut stream = raw_connection(&provider).await;
    write_request(&mut stream, "UserService", "Login", &[0u8; 64])
        .await
        .unwrap();
    let reply = read_frame(&mut stream, MAX_FRAME).await;
    assert!(!matches!(reply, Ok(Some(_))));

    provider.shutdown().await.unwrap();
}

/// Connections above the limit are turned away until a slot frees up.
#[tokio::test]
async fn test_connection_limit() {
    let store = Arc::new(NodeStore::new());
    let provider = RpcProvider::builder()
        .service(user_service())
        .registry(Arc::new(MemoryRegistry::attach(store.clone())))
        .max_connections(1)
        .start("127.0.0.1:0")
        .await
        .unwrap();

    // Occupy the only slot and make sure it is being served
    let mut held = raw_connection(&provider).await;
    let payload = MsgPackCodec::encode(&login_request()).unwrap();
    write_request(&mut held, "UserService", "Login", &payload)
        .await
        .unwrap();
    assert!(read_frame(&mut held, MAX_FRAME).await.unwrap().is_some());

    let stub = stub_for(&store, "UserService");
    let mut controller = RpcController::new();
    let _: LoginResponse = stub.call("Login", &login_request(), &mut controller).await;
    assert!(controller.failed());

    drop(held);

    let mut served = false;
    for _ in 0..50 {
        let mut controller = RpcController::new();
        let response: LoginResponse = stub.call("Login", &login_request(), &mut controller).await;
        if !controller.failed() && response.success {
            served = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(served, "slot was not released after the held connection closed");

    provider.shutdown().await.unwrap();
}

/// Controller reset after a failure.
#[test]
fn test_controller_reset() {
    let mut controller = RpcController::new();
    controller.set_failed("call aborted by caller");
    assert!(controller.failed());

    controller.reset();
    assert!(!controller.failed());
    assert_eq!(controller.error_text(), "");
}
