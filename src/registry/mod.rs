//! Service registry - publishing and resolving method locations.
//!
//! A provider registers one ephemeral node per method:
//!
//! ```text
//! /<service_name>                 persistent, empty
//! /<service_name>/<method_name>   ephemeral, "<host>:<port>"
//! ```
//!
//! The node lives as long as the provider's session with the coordination
//! service. A crash, a disconnect or a graceful [`Registry::close`] ends the
//! session and the coordination service removes the node, so a lookup never
//! resolves to a provider that is gone.
//!
//! Backends:
//! - [`MemoryRegistry`] - in-process store, one session per handle
//! - [`RemoteRegistry`] - client of the bundled [`CoordinatorServer`]
//! - `ZkRegistry` - Apache ZooKeeper (feature `zookeeper`)

mod coordinator;
mod memory;
mod remote;
mod store;
#[cfg(feature = "zookeeper")]
mod zookeeper;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use coordinator::{
    CoordRequest, CoordResponse, CoordinatorHandle, CoordinatorServer, DEFAULT_SESSION_TIMEOUT,
};
pub use memory::MemoryRegistry;
pub use remote::RemoteRegistry;
pub use store::{NodeMode, NodeStore, SessionId};
#[cfg(feature = "zookeeper")]
pub use zookeeper::ZkRegistry;

use crate::config::{RegistryBackend, RpcConfig};
use crate::error::RegistryError;
use crate::service::BoxFuture;

/// Network location of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RegistryError::Backend(format!("invalid endpoint {:?}", s));

        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Endpoint::new(host, port))
    }
}

impl From<std::net::SocketAddr> for Endpoint {
    fn from(addr: std::net::SocketAddr) -> Self {
        Endpoint::new(addr.ip().to_string(), addr.port())
    }
}

/// Path of the persistent node for a service.
pub fn service_path(service_name: &str) -> String {
    format!("/{}", service_name)
}

/// Path of the ephemeral node for a method.
pub fn method_path(service_name: &str, method_name: &str) -> String {
    format!("/{}/{}", service_name, method_name)
}

/// Discovery backend.
///
/// Implementations must be safe to share between tasks; every provider and
/// channel in a process may hold the same `Arc<dyn Registry>`.
pub trait Registry: Send + Sync + 'static {
    /// Publish `endpoint` for `service_name.method_name` as an ephemeral node.
    fn register<'a>(
        &'a self,
        service_name: &'a str,
        method_name: &'a str,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<(), RegistryError>>;

    /// Resolve the endpoint currently serving `service_name.method_name`.
    fn lookup<'a>(
        &'a self,
        service_name: &'a str,
        method_name: &'a str,
    ) -> BoxFuture<'a, Result<Endpoint, RegistryError>>;

    /// Remove a method node this session registered.
    ///
    /// Removing a node that is already gone is not an error.
    fn unregister<'a>(
        &'a self,
        service_name: &'a str,
        method_name: &'a str,
    ) -> BoxFuture<'a, Result<(), RegistryError>>;

    /// End the session; every ephemeral node it created disappears.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Connect to the registry backend named in the configuration.
///
/// # Errors
///
/// `Unreachable` if the coordination service does not answer.
pub async fn connect(config: &RpcConfig) -> Result<Arc<dyn Registry>, RegistryError> {
    match config.registry_backend {
        RegistryBackend::Beacon => {
            let registry = RemoteRegistry::connect(
                &config.registry_endpoint(),
                config.session_timeout,
                config.connect_timeout,
            )
            .await?;
            Ok(Arc::new(registry))
        }
        #[cfg(feature = "zookeeper")]
        RegistryBackend::ZooKeeper => {
            let registry = ZkRegistry::connect(&config.registry_endpoint()).await?;
            Ok(Arc::new(registry))
        }
        #[cfg(not(feature = "zookeeper"))]
        RegistryBackend::ZooKeeper => Err(RegistryError::Backend(
            "ZooKeeper backend requires the `zookeeper` feature".to_string(),
        )),
    }
}
