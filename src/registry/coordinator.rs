//! Coordination service: a [`NodeStore`] served over TCP.
//!
//! Every TCP connection is one session. Requests and responses are MsgPack
//! messages in length-prefixed frames. A session ends when the client
//! disconnects, sends [`CoordRequest::CloseSession`], or stays silent for
//! longer than the session timeout; its ephemeral nodes go with it.
//!
//! ```text
//! client                           coordinator
//!   | -- [len][Create{..}] ------------> |
//!   | <------------- [len][Done] ------- |
//!   | -- [len][Ping] ------------------> |   (heartbeat, < timeout apart)
//!   | <------------- [len][Done] ------- |
//!   x  silence > timeout                 |   session closed, ephemerals removed
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::store::{NodeMode, NodeStore, SessionId};
use super::Endpoint;
use crate::codec::MsgPackCodec;
use crate::error::{RegistryError, Result};
use crate::protocol::{read_frame, write_frame};
use crate::transport::RpcListener;

/// Largest coordination frame accepted in either direction.
pub const MAX_COORD_FRAME_SIZE: u32 = 1024 * 1024;

/// Default session timeout.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(6);

/// Request from a registry client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordRequest {
    /// Create a node.
    Create {
        path: String,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        mode: NodeMode,
    },
    /// Read a node's data.
    Get { path: String },
    /// Delete a childless node.
    Delete { path: String },
    /// Delete an ephemeral node owned by this session.
    DeleteOwned { path: String },
    /// List a node's children.
    Children { path: String },
    /// Keep the session alive.
    Ping,
    /// End the session now and remove its ephemeral nodes.
    CloseSession,
}

/// Coordination service reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordResponse {
    /// The request succeeded and carries no data.
    Done,
    /// Node data.
    Data(#[serde(with = "serde_bytes")] Vec<u8>),
    /// Child names.
    Children(Vec<String>),
    /// No node at the path.
    NotFound(String),
    /// The node is held by another session.
    NodeExists(String),
    /// The path is malformed.
    InvalidPath(String),
    /// Any other failure.
    Failed(String),
}

impl From<RegistryError> for CoordResponse {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(path) => CoordResponse::NotFound(path),
            RegistryError::NodeExists(path) => CoordResponse::NodeExists(path),
            RegistryError::InvalidPath(path) => CoordResponse::InvalidPath(path),
            RegistryError::Unreachable(msg) | RegistryError::Backend(msg) => {
                CoordResponse::Failed(msg)
            }
        }
    }
}

impl CoordResponse {
    fn into_error(self) -> RegistryError {
        match self {
            CoordResponse::NotFound(path) => RegistryError::NotFound(path),
            CoordResponse::NodeExists(path) => RegistryError::NodeExists(path),
            CoordResponse::InvalidPath(path) => RegistryError::InvalidPath(path),
            CoordResponse::Failed(msg) => RegistryError::Backend(msg),
            other => RegistryError::Backend(format!("unexpected response {:?}", other)),
        }
    }

    /// Expect [`CoordResponse::Done`].
    pub fn into_done(self) -> std::result::Result<(), RegistryError> {
        match self {
            CoordResponse::Done => Ok(()),
            other => Err(other.into_error()),
        }
    }

    /// Expect [`CoordResponse::Data`].
    pub fn into_data(self) -> std::result::Result<Vec<u8>, RegistryError> {
        match self {
            CoordResponse::Data(data) => Ok(data),
            other => Err(other.into_error()),
        }
    }

    /// Expect [`CoordResponse::Children`].
    pub fn into_children(self) -> std::result::Result<Vec<String>, RegistryError> {
        match self {
            CoordResponse::Children(names) => Ok(names),
            other => Err(other.into_error()),
        }
    }
}

/// Coordination service configuration.
///
/// # Example
///
/// ```ignore
/// let handle = CoordinatorServer::new(Duration::from_secs(6))
///     .bind("0.0.0.0:2181")
///     .await?;
/// handle.wait().await;
/// ```
#[derive(Debug, Clone)]
pub struct CoordinatorServer {
    store: Arc<NodeStore>,
    session_timeout: Duration,
}

impl CoordinatorServer {
    /// Create a server with an empty store.
    pub fn new(session_timeout: Duration) -> Self {
        Self::with_store(Arc::new(NodeStore::new()), session_timeout)
    }

    /// Serve an existing store.
    pub fn with_store(store: Arc<NodeStore>, session_timeout: Duration) -> Self {
        Self {
            store,
            session_timeout,
        }
    }

    /// Bind and start accepting sessions.
    pub async fn bind(self, addr: &str) -> Result<CoordinatorHandle> {
        let listener = RpcListener::bind(addr).await?;
        let local_addr = listener.local_addr();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(
            "coordination service listening on {} (session timeout {:?})",
            local_addr,
            self.session_timeout
        );

        let store = self.store.clone();
        let task = tokio::spawn(accept_loop(
            listener,
            self.store,
            self.session_timeout,
            shutdown_rx,
        ));

        Ok(CoordinatorHandle {
            local_addr,
            store,
            shutdown_tx,
            task,
        })
    }
}

/// A running coordination service.
///
/// Dropping the handle stops the service.
#[derive(Debug)]
pub struct CoordinatorHandle {
    local_addr: SocketAddr,
    store: Arc<NodeStore>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Address the service is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address as a registry endpoint.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::from(self.local_addr)
    }

    /// The served store.
    pub fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    /// Stop accepting, end every session and wait for the accept loop.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }

    /// Run until the accept loop exits.
    pub async fn wait(self) {
        let CoordinatorHandle {
            shutdown_tx, task, ..
        } = self;
        let _ = task.await;
        drop(shutdown_tx);
    }
}

async fn accept_loop(
    listener: RpcListener,
    store: Arc<NodeStore>,
    session_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_session(
                        stream,
                        peer,
                        store.clone(),
                        session_timeout,
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!("accept failed: {}", e);
                }
            }
        }
    }
    tracing::info!("coordination service stopped");
}

async fn serve_session(
    stream: TcpStream,
    peer: SocketAddr,
    store: Arc<NodeStore>,
    session_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let session = store.open_session();
    tracing::debug!("session {} opened by {}", session, peer);

    let (mut reader, mut writer) = stream.into_split();

    let reason = loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break "shutdown",
            frame = tokio::time::timeout(
                session_timeout,
                read_frame(&mut reader, MAX_COORD_FRAME_SIZE),
            ) => frame,
        };

        let body = match frame {
            Err(_) => break "session timeout",
            Ok(Ok(None)) => break "disconnect",
            Ok(Ok(Some(body))) => body,
            Ok(Err(e)) => {
                tracing::warn!("session {}: {}", session, e);
                break "protocol error";
            }
        };

        let request: CoordRequest = match MsgPackCodec::decode(&body) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("session {}: undecodable request: {}", session, e);
                break "protocol error";
            }
        };

        let closing = request == CoordRequest::CloseSession;
        let response = if closing {
            close_session(&store, session);
            CoordResponse::Done
        } else {
            apply(&store, session, request)
        };

        let sent = match MsgPackCodec::encode(&response) {
            Ok(bytes) => write_frame(&mut writer, &bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            tracing::debug!("session {}: reply failed: {}", session, e);
            break "write failed";
        }
        if closing {
            break "closed by client";
        }
    };

    let removed = close_session(&store, session);
    tracing::debug!(
        "session {} ended ({}), {} ephemeral node(s) removed",
        session,
        reason,
        removed
    );
}

fn close_session(store: &NodeStore, session: SessionId) -> usize {
    let removed = store.close_session(session);
    for path in &removed {
        tracing::info!("removed ephemeral node {} (session {})", path, session);
    }
    removed.len()
}

fn apply(store: &NodeStore, session: SessionId, request: CoordRequest) -> CoordResponse {
    let result = match request {
        CoordRequest::Create { path, data, mode } => store
            .create(session, &path, &data, mode)
            .map(|()| CoordResponse::Done),
        CoordRequest::Get { path } => store.get(&path).map(CoordResponse::Data),
        CoordRequest::Delete { path } => store.delete(&path).map(|()| CoordResponse::Done),
        CoordRequest::DeleteOwned { path } => store
            .delete_owned(session, &path)
            .map(|()| CoordResponse::Done),
        CoordRequest::Children { path } => store.children(&path).map(CoordResponse::Children),
        CoordRequest::Ping | CoordRequest::CloseSession => Ok(CoordResponse::Done),
    };
    result.unwrap_or_else(CoordResponse::from)
}
