//! Client invocation channel.
//!
//! [`RpcChannel::call`] performs one complete remote call:
//!
//! 1. look up `/<service>/<method>` in the registry (fresh every call)
//! 2. connect to the advertised endpoint
//! 3. write the framed request
//! 4. read one length-prefixed response
//! 5. drop the connection
//!
//! Failures never panic or return `Err` to the caller; they mark the
//! [`RpcController`] failed and an empty byte string comes back.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::config::{RpcConfig, DEFAULT_CALL_TIMEOUT, DEFAULT_CONNECT_TIMEOUT};
use crate::controller::RpcController;
use crate::error::{Result, RpcError};
use crate::protocol::{read_frame, write_request, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::registry::Registry;
use crate::transport;

/// Channel timeouts and limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// TCP connect deadline.
    pub connect_timeout: Duration,
    /// Deadline for writing the request and reading the full response.
    pub call_timeout: Duration,
    /// Largest response accepted.
    pub max_response_size: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_response_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl From<&RpcConfig> for ChannelConfig {
    fn from(config: &RpcConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            call_timeout: config.call_timeout,
            ..Self::default()
        }
    }
}

/// Caller side of the framework.
///
/// Cheap to share: wrap it in an `Arc` and hand it to as many stubs and
/// tasks as needed. Calls do not share connections.
pub struct RpcChannel {
    registry: Arc<dyn Registry>,
    config: ChannelConfig,
}

impl RpcChannel {
    /// Create a channel with default timeouts.
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self::with_config(registry, ChannelConfig::default())
    }

    /// Create a channel with explicit timeouts.
    pub fn with_config(registry: Arc<dyn Registry>, config: ChannelConfig) -> Self {
        Self { registry, config }
    }

    /// The registry used for lookups.
    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Channel configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Perform a call, reporting failure through `controller`.
    ///
    /// The controller is reset first, so after the call it describes this
    /// call only. Returns the raw response bytes, or empty bytes when the
    /// call failed.
    pub async fn call(
        &self,
        service_name: &str,
        method_name: &str,
        request: &[u8],
        controller: &mut RpcController,
    ) -> Bytes {
        controller.reset();
        match self.try_call(service_name, method_name, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("call {}.{} failed: {}", service_name, method_name, e);
                controller.fail_from(&e);
                Bytes::new()
            }
        }
    }

    /// Perform a call, returning failures as errors.
    ///
    /// # Errors
    ///
    /// - `Registry(NotFound)` / `Registry(Unreachable)` from the lookup
    /// - `Connection` or `Timeout("connect")` when the provider cannot be reached
    /// - `Timeout("call")` when the response does not arrive in time
    /// - `Protocol` / `Io` when the exchange breaks mid-way
    pub async fn try_call(
        &self,
        service_name: &str,
        method_name: &str,
        request: &[u8],
    ) -> Result<Bytes> {
        let endpoint = self.registry.lookup(service_name, method_name).await?;
        tracing::trace!("{}.{} resolved to {}", service_name, method_name, endpoint);

        let mut stream = transport::connect(&endpoint, self.config.connect_timeout).await?;

        let exchange = async {
            write_request(&mut stream, service_name, method_name, request).await?;
            read_frame(&mut stream, self.config.max_response_size)
                .await?
                .ok_or_else(|| {
                    RpcError::Protocol(format!(
                        "{} closed the connection without a response",
                        endpoint
                    ))
                })
        };

        tokio::time::timeout(self.config.call_timeout, exchange)
            .await
            .map_err(|_| RpcError::Timeout("call"))?
    }
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
