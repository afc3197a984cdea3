//! TCP listener and connector.
//!
//! # Example
//!
//! ```ignore
//! use beacon_rpc::transport::{connect, RpcListener};
//!
//! let listener = RpcListener::bind("127.0.0.1:0").await?;
//! let stream = connect(&listener.local_addr().into(), timeout).await?;
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::error::{Result, RpcError};
use crate::registry::Endpoint;

/// Bound TCP listener.
#[derive(Debug)]
pub struct RpcListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl RpcListener {
    /// Bind to `addr` (`host:port`; port 0 picks a free port).
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RpcError::Connection(format!("bind {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay failed for {}: {}", peer, e);
        }
        Ok((stream, peer))
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Open a TCP connection to `endpoint`, giving up after `timeout`.
///
/// # Errors
///
/// `Timeout("connect")` when the deadline elapses, `Connection` when the
/// peer refuses or the host does not resolve.
pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream> {
    let target = (endpoint.host.as_str(), endpoint.port);
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(RpcError::Connection(format!("{}: {}", endpoint, e))),
        Err(_) => return Err(RpcError::Timeout("connect")),
    };

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("set_nodelay failed for {}: {}", endpoint, e);
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_accept_connect() {
        let listener = RpcListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();
        assert_ne!(addr.port(), 0);

        let accept = tokio::spawn(async move { listener.accept().await.map(|(_, peer)| peer) });
        let stream = connect(&Endpoint::from(addr), Duration::from_secs(1))
            .await
            .unwrap();

        let peer = accept.await.unwrap().unwrap();
        assert_eq!(peer, stream.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let addr = RpcListener::bind("127.0.0.1:0").await.unwrap().local_addr();

        let err = connect(&Endpoint::from(addr), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Connection(_)));
    }

    #[tokio::test]
    async fn test_bind_invalid_address() {
        let err = RpcListener::bind("not an address").await.unwrap_err();
        assert!(err.to_string().contains("bind"));
    }
}
