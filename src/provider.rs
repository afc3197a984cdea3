//! Provider builder and runtime loop.
//!
//! The [`ProviderBuilder`] collects service descriptors and settings. The
//! [`RpcProvider`] manages the lifecycle:
//! 1. Bind the TCP listener
//! 2. Register every (service, method) in the registry
//! 3. Accept connections, one task each
//! 4. Per connection: read request, dispatch, write response, repeat
//!
//! # Example
//!
//! ```ignore
//! use beacon_rpc::{MethodError, RpcProvider, ServiceDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let user_service = ServiceDescriptor::new("UserService")
//!         .method("Login", |req: LoginRequest| async move {
//!             Ok::<_, MethodError>(login(req))
//!         });
//!
//!     let provider = RpcProvider::builder()
//!         .service(user_service)
//!         .registry(registry)
//!         .start("127.0.0.1:8000")
//!         .await?;
//!
//!     provider.wait_for_shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;

use crate::codec::MsgPackCodec;
use crate::config::{RpcConfig, DEFAULT_MAX_CONNECTIONS, MAX_CONNECTIONS_LIMIT};
use crate::error::{Result, RpcError};
use crate::protocol::{
    read_payload, read_request_header, write_frame, DEFAULT_MAX_HEADER_SIZE,
    DEFAULT_MAX_PAYLOAD_SIZE,
};
use crate::registry::{Endpoint, MemoryRegistry, Registry};
use crate::service::{DispatchOutcome, DispatchTable, ServiceDescriptor};
use crate::transport::RpcListener;

/// Limits applied to every connection.
#[derive(Debug, Clone, Copy)]
struct Limits {
    max_header_size: u32,
    max_payload_size: u32,
}

/// Builder for configuring and starting a provider.
pub struct ProviderBuilder {
    services: Vec<ServiceDescriptor>,
    registry: Option<Arc<dyn Registry>>,
    advertise: Option<Endpoint>,
    max_connections: usize,
    limits: Limits,
}

impl ProviderBuilder {
    /// Create a new provider builder.
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            registry: None,
            advertise: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            limits: Limits {
                max_header_size: DEFAULT_MAX_HEADER_SIZE,
                max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            },
        }
    }

    /// Take settings from the process configuration.
    pub fn config(self, config: &RpcConfig) -> Self {
        self.max_connections(config.max_connections)
    }

    /// Publish a service.
    ///
    /// A service with the same name as an earlier one replaces it.
    pub fn service(mut self, descriptor: ServiceDescriptor) -> Self {
        self.services.push(descriptor);
        self
    }

    /// Registry to publish methods in.
    ///
    /// Default: a private [`MemoryRegistry`], useful only for tests that
    /// talk to the provider directly.
    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Endpoint written to the registry.
    ///
    /// Default: the bound address.
    pub fn advertise(mut self, endpoint: Endpoint) -> Self {
        self.advertise = Some(endpoint);
        self
    }

    /// Set the maximum number of concurrent connections.
    ///
    /// Connections beyond the limit are closed right after accept. The
    /// limit is clamped to `1..=MAX_CONNECTIONS_LIMIT`.
    /// Default: 1024
    pub fn max_connections(mut self, limit: usize) -> Self {
        let clamped = limit.clamp(1, MAX_CONNECTIONS_LIMIT);
        if clamped != limit {
            tracing::warn!("max_connections {} out of range, using {}", limit, clamped);
        }
        self.max_connections = clamped;
        self
    }

    /// Set the largest request header accepted.
    ///
    /// Default: 64 KiB
    pub fn max_header_size(mut self, size: u32) -> Self {
        self.limits.max_header_size = size;
        self
    }

    /// Set the largest request payload accepted.
    ///
    /// Default: 64 MiB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.limits.max_payload_size = size;
        self
    }

    /// Bind, register and start serving.
    ///
    /// # Errors
    ///
    /// Fails if binding fails or any registration is rejected (for example
    /// `NodeExists` when another live provider owns the method).
    pub async fn start(self, bind_addr: &str) -> Result<RpcProvider> {
        RpcProvider::start(self, bind_addr).await
    }
}

impl Default for ProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running provider.
///
/// Use `shutdown()` to stop it, or `wait_for_shutdown()` to serve until
/// interrupted. Dropping it stops the accept loop without closing the
/// registry session.
pub struct RpcProvider {
    local_addr: SocketAddr,
    endpoint: Endpoint,
    table: Arc<DispatchTable>,
    registry: Arc<dyn Registry>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    accept_task: JoinHandle<()>,
}

impl RpcProvider {
    /// Create a new provider builder.
    pub fn builder() -> ProviderBuilder {
        ProviderBuilder::new()
    }

    async fn start(builder: ProviderBuilder, bind_addr: &str) -> Result<Self> {
        let table = Arc::new(DispatchTable::new(builder.services));
        let registry = builder
            .registry
            .unwrap_or_else(|| Arc::new(MemoryRegistry::new()));

        // 1. Bind
        let listener = RpcListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr();
        let endpoint = builder
            .advertise
            .unwrap_or_else(|| Endpoint::from(local_addr));

        // 2. Register every method before accepting
        let mut registered = Vec::new();
        for (service_name, method_name) in table.entries() {
            if let Err(e) = registry.register(service_name, method_name, &endpoint).await {
                tracing::error!(
                    "cannot register {}.{} at {}: {}",
                    service_name,
                    method_name,
                    endpoint,
                    e
                );
                Self::unregister_all(&*registry, &registered).await;
                return Err(RpcError::Registry(e));
            }
            tracing::info!("registered {}.{} at {}", service_name, method_name, endpoint);
            registered.push((service_name, method_name));
        }

        // 3. Accept loop
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let semaphore = Arc::new(Semaphore::new(builder.max_connections));
        let accept_task = tokio::spawn(Self::accept_loop(
            listener,
            table.clone(),
            semaphore,
            builder.limits,
            shutdown_rx,
        ));

        tracing::info!("provider listening on {}", local_addr);

        Ok(RpcProvider {
            local_addr,
            endpoint,
            table,
            registry,
            shutdown_tx: Some(shutdown_tx),
            accept_task,
        })
    }

    /// Withdraw the methods of a start that did not complete.
    async fn unregister_all(registry: &dyn Registry, registered: &[(&str, &str)]) {
        for (service_name, method_name) in registered.iter().rev() {
            match registry.unregister(service_name, method_name).await {
                Ok(()) => tracing::info!("unregistered {}.{}", service_name, method_name),
                Err(e) => {
                    tracing::warn!("cannot unregister {}.{}: {}", service_name, method_name, e)
                }
            }
        }
    }

    async fn accept_loop(
        listener: RpcListener,
        table: Arc<DispatchTable>,
        semaphore: Arc<Semaphore>,
        limits: Limits,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown_rx => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!("accept failed: {}", e);
                        continue;
                    }
                },
            };

            // Try to acquire a connection permit
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(p) => p,
                Err(_) => {
                    tracing::warn!("connection limit reached, dropping connection from {}", peer);
                    continue;
                }
            };

            let table = table.clone();
            tokio::spawn(async move {
                // Permit is held until the connection ends
                let _permit = permit;

                match Self::serve_connection(stream, &table, limits).await {
                    Ok(()) => tracing::debug!("{} disconnected", peer),
                    Err(e) => tracing::warn!("connection from {} closed: {}", peer, e),
                }
            });
        }
        tracing::info!("provider stopped accepting");
    }

    /// Serve requests on one connection until EOF or error.
    ///
    /// Requests are handled strictly one after another; the next header is
    /// read only after the previous response is written.
    async fn serve_connection(
        mut stream: TcpStream,
        table: &Arc<DispatchTable>,
        limits: Limits,
    ) -> Result<()> {
        loop {
            let header = match read_request_header(&mut stream, limits.max_header_size).await? {
                Some(header) => header,
                None => return Ok(()),
            };
            let payload =
                read_payload(&mut stream, header.payload_size, limits.max_payload_size).await?;

            tracing::trace!(
                "request {} ({} bytes)",
                header.qualified_name(),
                payload.len()
            );

            let response = match table.lookup(&header.service_name, &header.method_name) {
                DispatchOutcome::Found(handler) => Self::invoke(handler, payload).await?,
                DispatchOutcome::Miss(envelope) => {
                    tracing::debug!("{}", envelope.result.errmsg);
                    MsgPackCodec::encode(&envelope)?
                }
            };

            write_frame(&mut stream, &response).await?;
        }
    }

    /// Run a handler in its own task so a panic only costs this connection.
    async fn invoke(
        handler: Arc<dyn crate::service::MethodHandler>,
        payload: Bytes,
    ) -> Result<Vec<u8>> {
        match tokio::spawn(handler.call(payload)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(RpcError::Protocol("handler panicked".to_string())),
            Err(e) => Err(RpcError::Protocol(format!("handler task failed: {}", e))),
        }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint published in the registry.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Published services.
    pub fn dispatch_table(&self) -> &DispatchTable {
        &self.table
    }

    /// Stop accepting connections and end the registry session.
    ///
    /// Connections already being served finish their current request and
    /// end when the peer disconnects.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.accept_task).await;
        self.registry.close().await;
        Ok(())
    }

    /// Serve until Ctrl-C, then shut down.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        tokio::signal::ctrl_c().await?;
        tracing::info!("interrupt received, shutting down");
        self.shutdown().await
    }
}

impl std::fmt::Debug for RpcProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcProvider")
            .field("local_addr", &self.local_addr)
            .field("endpoint", &self.endpoint)
            .field("services", &self.table.entries())
            .finish_non_exhaustive()
    }
}
