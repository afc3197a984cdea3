//! # beacon-rpc
//!
//! RPC framework with service discovery.
//!
//! A provider publishes named services; each method is registered as an
//! ephemeral node `/<service>/<method>` holding the provider's `host:port`.
//! A caller looks the method up, connects, sends one framed request and
//! reads one framed response.
//!
//! ## Architecture
//!
//! - **Wire framing** ([`protocol`]): `[u32 BE header_len][MsgPack header][payload]`
//!   requests, `[u32 BE len][bytes]` responses
//! - **Dispatch** ([`service`]): immutable (service, method) table of
//!   type-erased handlers
//! - **Discovery** ([`registry`]): pluggable backend with sessions and
//!   ephemeral nodes
//! - **Caller side**: [`RpcChannel`], [`ServiceStub`], [`RpcController`]
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use beacon_rpc::{MethodError, RpcChannel, RpcController, RpcProvider, ServiceDescriptor, ServiceStub};
//! use beacon_rpc::registry::MemoryRegistry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(MemoryRegistry::new());
//!
//!     let provider = RpcProvider::builder()
//!         .service(ServiceDescriptor::new("Math").method("Double", |n: i64| async move {
//!             Ok::<_, MethodError>(n * 2)
//!         }))
//!         .registry(registry.clone())
//!         .start("127.0.0.1:0")
//!         .await?;
//!
//!     let stub = ServiceStub::new(Arc::new(RpcChannel::new(registry)), "Math");
//!     let mut controller = RpcController::new();
//!     let doubled: i64 = stub.call("Double", &21i64, &mut controller).await;
//!     assert_eq!(doubled, 42);
//!
//!     provider.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod logger;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod telemetry;
pub mod transport;

mod channel;
mod controller;
mod provider;
mod stub;

pub use channel::{ChannelConfig, RpcChannel};
pub use config::RpcConfig;
pub use controller::{FailureKind, RpcController};
pub use error::{ConfigError, RegistryError, Result, RpcError};
pub use protocol::ResultCode;
pub use provider::{ProviderBuilder, RpcProvider};
pub use registry::{Endpoint, Registry};
pub use service::{MethodError, ServiceDescriptor};
pub use stub::ServiceStub;
