//! Client of the TCP coordination service.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::coordinator::{CoordRequest, CoordResponse, MAX_COORD_FRAME_SIZE};
use super::store::NodeMode;
use super::{method_path, service_path, Endpoint, Registry};
use crate::codec::MsgPackCodec;
use crate::error::{RegistryError, Result, RpcError};
use crate::protocol::{read_frame, write_frame};
use crate::service::BoxFuture;
use crate::transport;

/// Registry backed by a [`CoordinatorServer`](super::CoordinatorServer).
///
/// Holds one connection (one session) and pings every third of the session
/// timeout so the session outlives idle periods. If the connection drops, the
/// next request (at the latest the next heartbeat) opens a new session and
/// re-creates every method this handle registered before serving it.
#[derive(Debug)]
pub struct RemoteRegistry {
    inner: Arc<Inner>,
    heartbeat: JoinHandle<()>,
}

#[derive(Debug)]
struct Inner {
    endpoint: Endpoint,
    connect_timeout: Duration,
    session_timeout: Duration,
    conn: Mutex<Option<TcpStream>>,
    registrations: parking_lot::Mutex<BTreeMap<(String, String), Endpoint>>,
    had_session: AtomicBool,
    closed: AtomicBool,
}

impl RemoteRegistry {
    /// Connect and open a session.
    ///
    /// # Errors
    ///
    /// `Unreachable` if the coordination service does not answer a ping
    /// within `connect_timeout`.
    pub async fn connect(
        endpoint: &Endpoint,
        session_timeout: Duration,
        connect_timeout: Duration,
    ) -> std::result::Result<Self, RegistryError> {
        let inner = Arc::new(Inner {
            endpoint: endpoint.clone(),
            connect_timeout,
            session_timeout,
            conn: Mutex::new(None),
            registrations: parking_lot::Mutex::new(BTreeMap::new()),
            had_session: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        inner.request(&CoordRequest::Ping).await?.into_done()?;
        tracing::info!("registry session opened with {}", endpoint);

        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::downgrade(&inner),
            heartbeat_interval(session_timeout),
        ));

        Ok(Self { inner, heartbeat })
    }

    /// Coordination service address.
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// List the methods currently registered under a service.
    pub async fn methods(&self, service_name: &str) -> std::result::Result<Vec<String>, RegistryError> {
        self.inner
            .request(&CoordRequest::Children {
                path: service_path(service_name),
            })
            .await?
            .into_children()
    }
}

fn heartbeat_interval(session_timeout: Duration) -> Duration {
    (session_timeout / 3).max(Duration::from_millis(10))
}

async fn heartbeat_loop(inner: Weak<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.closed.load(Ordering::Acquire) {
            break;
        }
        if let Err(e) = inner.request(&CoordRequest::Ping).await {
            tracing::warn!("registry heartbeat failed: {}", e);
        }
    }
}

impl Inner {
    async fn open(&self) -> std::result::Result<TcpStream, RegistryError> {
        let mut stream = transport::connect(&self.endpoint, self.connect_timeout)
            .await
            .map_err(|e| RegistryError::Unreachable(format!("{}: {}", self.endpoint, e)))?;

        if self.had_session.swap(true, Ordering::AcqRel) {
            tracing::warn!("registry session with {} was lost and re-opened", self.endpoint);
            self.restore(&mut stream).await?;
        }
        Ok(stream)
    }

    /// Re-create the method nodes of the previous session on a new one.
    async fn restore(&self, stream: &mut TcpStream) -> std::result::Result<(), RegistryError> {
        let registrations: Vec<((String, String), Endpoint)> = self
            .registrations
            .lock()
            .iter()
            .map(|(key, endpoint)| (key.clone(), endpoint.clone()))
            .collect();

        for ((service_name, method_name), endpoint) in registrations {
            let [parent, node] = create_requests(&service_name, &method_name, &endpoint);

            let parent = exchange(stream, &parent, self.session_timeout).await;
            let node = match parent {
                Ok(_) => exchange(stream, &node, self.session_timeout).await,
                Err(e) => Err(e),
            };
            match node.map(CoordResponse::into_done) {
                Ok(Ok(())) => {
                    tracing::info!("re-registered {}.{} at {}", service_name, method_name, endpoint)
                }
                Ok(Err(e)) => tracing::error!(
                    "cannot re-register {}.{} at {}: {}",
                    service_name,
                    method_name,
                    endpoint,
                    e
                ),
                Err(e) => {
                    return Err(RegistryError::Unreachable(format!("{}: {}", self.endpoint, e)))
                }
            }
        }
        Ok(())
    }

    /// Send one request and wait for its reply.
    ///
    /// Any transport failure drops the connection so the next call starts a
    /// new session.
    async fn request(
        &self,
        request: &CoordRequest,
    ) -> std::result::Result<CoordResponse, RegistryError> {
        let mut conn = self.conn.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(RegistryError::Backend("registry closed".to_string()));
        }

        let mut stream = match conn.take() {
            Some(stream) => stream,
            None => self.open().await?,
        };

        match exchange(&mut stream, request, self.session_timeout).await {
            Ok(response) => {
                *conn = Some(stream);
                Ok(response)
            }
            Err(e) => Err(RegistryError::Unreachable(format!("{}: {}", self.endpoint, e))),
        }
    }
}

/// Persistent service node, then the ephemeral method node.
fn create_requests(service_name: &str, method_name: &str, endpoint: &Endpoint) -> [CoordRequest; 2] {
    [
        CoordRequest::Create {
            path: service_path(service_name),
            data: Vec::new(),
            mode: NodeMode::Persistent,
        },
        CoordRequest::Create {
            path: method_path(service_name, method_name),
            data: endpoint.to_string().into_bytes(),
            mode: NodeMode::Ephemeral,
        },
    ]
}

async fn exchange(
    stream: &mut TcpStream,
    request: &CoordRequest,
    timeout: Duration,
) -> Result<CoordResponse> {
    let bytes = MsgPackCodec::encode(request)?;
    write_frame(stream, &bytes).await?;

    let body = tokio::time::timeout(timeout, read_frame(stream, MAX_COORD_FRAME_SIZE))
        .await
        .map_err(|_| RpcError::Timeout("registry request"))??
        .ok_or_else(|| RpcError::Connection("coordination service closed the session".into()))?;

    MsgPackCodec::decode(&body)
}

impl Registry for RemoteRegistry {
    fn register<'a>(
        &'a self,
        service_name: &'a str,
        method_name: &'a str,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, std::result::Result<(), RegistryError>> {
        Box::pin(async move {
            let [parent, node] = create_requests(service_name, method_name, endpoint);
            match self.inner.request(&parent).await?.into_done() {
                Ok(()) | Err(RegistryError::NodeExists(_)) => {}
                Err(e) => return Err(e),
            }

            self.inner.request(&node).await?.into_done()?;
            self.inner.registrations.lock().insert(
                (service_name.to_string(), method_name.to_string()),
                endpoint.clone(),
            );
            Ok(())
        })
    }

    fn unregister<'a>(
        &'a self,
        service_name: &'a str,
        method_name: &'a str,
    ) -> BoxFuture<'a, std::result::Result<(), RegistryError>> {
        Box::pin(async move {
            self.inner
                .registrations
                .lock()
                .remove(&(service_name.to_string(), method_name.to_string()));

            let request = CoordRequest::DeleteOwned {
                path: method_path(service_name, method_name),
            };
            match self.inner.request(&request).await?.into_done() {
                Ok(()) | Err(RegistryError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            }
        })
    }

    fn lookup<'a>(
        &'a self,
        service_name: &'a str,
        method_name: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Endpoint, RegistryError>> {
        Box::pin(async move {
            let path = method_path(service_name, method_name);
            let data = self
                .inner
                .request(&CoordRequest::Get { path: path.clone() })
                .await?
                .into_data()?;
            let text = String::from_utf8(data)
                .map_err(|_| RegistryError::Backend(format!("node {} holds non-UTF-8 data", path)))?;
            text.parse()
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.heartbeat.abort();

            let mut conn = self.inner.conn.lock().await;
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            if let Some(mut stream) = conn.take() {
                if let Err(e) =
                    exchange(&mut stream, &CoordRequest::CloseSession, self.inner.session_timeout)
                        .await
                {
                    tracing::debug!("close session: {}", e);
                }
            }
            tracing::info!("registry session with {} closed", self.inner.endpoint);
        })
    }
}

impl Drop for RemoteRegistry {
    fn drop(&mut self) {
        // The connection closes with `inner`; the coordinator ends the session on EOF
        self.heartbeat.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CoordinatorServer;

    const SECOND: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_register_and_lookup_across_sessions() {
        let server = CoordinatorServer::new(SECOND)
            .bind("127.0.0.1:0")
            .await
            .unwrap();

        let provider = RemoteRegistry::connect(&server.endpoint(), SECOND, SECOND)
            .await
            .unwrap();
        let caller = RemoteRegistry::connect(&server.endpoint(), SECOND, SECOND)
            .await
            .unwrap();

        let endpoint = Endpoint::new("127.0.0.1", 8000);
        provider.register("UserService", "Login", &endpoint).await.unwrap();
        provider.register("UserService", "Register", &endpoint).await.unwrap();

        assert_eq!(caller.lookup("UserService", "Login").await.unwrap(), endpoint);
        assert_eq!(
            caller.methods("UserService").await.unwrap(),
            vec!["Login", "Register"]
        );

        provider.close().await;
        assert!(matches!(
            caller.lookup("UserService", "Login").await,
            Err(RegistryError::NotFound(_))
        ));

        caller.close().await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_session_alive() {
        let timeout = Duration::from_millis(150);
        let server = CoordinatorServer::new(timeout)
            .bind("127.0.0.1:0")
            .await
            .unwrap();

        let provider = RemoteRegistry::connect(&server.endpoint(), timeout, SECOND)
            .await
            .unwrap();
        provider
            .register("S", "m", &Endpoint::new("h", 1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(server.store().get("/S/m").unwrap(), b"h:1");

        provider.close().await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_lost_session_restores_registrations() {
        // Heartbeats every second against a 150 ms server timeout: the
        // session expires between pings
        let server = CoordinatorServer::new(Duration::from_millis(150))
            .bind("127.0.0.1:0")
            .await
            .unwrap();
        let provider = RemoteRegistry::connect(&server.endpoint(), Duration::from_secs(3), SECOND)
            .await
            .unwrap();
        let endpoint = Endpoint::new("127.0.0.1", 8000);
        provider.register("S", "m", &endpoint).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(matches!(
            server.store().get("/S/m"),
            Err(RegistryError::NotFound(_))
        ));

        // The first request after expiry notices the dead connection, the
        // next one opens a new session and restores the node
        let mut restored = false;
        for _ in 0..50 {
            let _ = provider.methods("S").await;
            if server.store().get("/S/m").is_ok() {
                restored = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(restored);
        assert_eq!(provider.lookup("S", "m").await.unwrap(), endpoint);

        provider.close().await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unregister() {
        let server = CoordinatorServer::new(SECOND)
            .bind("127.0.0.1:0")
            .await
            .unwrap();
        let provider = RemoteRegistry::connect(&server.endpoint(), SECOND, SECOND)
            .await
            .unwrap();
        let other = RemoteRegistry::connect(&server.endpoint(), SECOND, SECOND)
            .await
            .unwrap();

        provider.register("S", "a", &Endpoint::new("h", 1)).await.unwrap();
        other.register("S", "b", &Endpoint::new("h", 2)).await.unwrap();

        provider.unregister("S", "a").await.unwrap();
        provider.unregister("S", "a").await.unwrap();
        assert!(matches!(
            server.store().get("/S/a"),
            Err(RegistryError::NotFound(_))
        ));
        assert!(provider.inner.registrations.lock().is_empty());

        // Nodes of other sessions are left alone
        assert!(provider.unregister("S", "b").await.is_err());
        assert_eq!(server.store().get("/S/b").unwrap(), b"h:2");

        provider.close().await;
        other.close().await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unreachable() {
        let addr = crate::transport::RpcListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr();

        let err = RemoteRegistry::connect(&Endpoint::from(addr), SECOND, SECOND)
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_requests_after_close_fail() {
        let server = CoordinatorServer::new(SECOND)
            .bind("127.0.0.1:0")
            .await
            .unwrap();
        let registry = RemoteRegistry::connect(&server.endpoint(), SECOND, SECOND)
            .await
            .unwrap();

        registry.close().await;
        registry.close().await;
        assert!(registry.lookup("S", "m").await.is_err());

        server.shutdown().await;
    }

    #[test]
    fn test_heartbeat_interval() {
        assert_eq!(heartbeat_interval(Duration::from_secs(6)), Duration::from_secs(2));
        assert_eq!(
            heartbeat_interval(Duration::from_millis(3)),
            Duration::from_millis(10)
        );
    }
}
