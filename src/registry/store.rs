//! In-memory node tree with sessions and ephemeral nodes.
//!
//! This is the state behind both [`MemoryRegistry`](super::MemoryRegistry)
//! and the TCP [`CoordinatorServer`](super::CoordinatorServer). It follows
//! ZooKeeper's rules where they matter for discovery:
//!
//! - paths are absolute, `/`-separated, without empty segments
//! - a node can only be created under an existing parent
//! - ephemeral nodes belong to a session and cannot have children
//! - closing a session deletes every ephemeral node it owns

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use parking_lot::Mutex;

use crate::error::RegistryError;

/// Identifier of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Node lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NodeMode {
    /// Lives until explicitly deleted.
    Persistent,
    /// Deleted when the owning session ends.
    Ephemeral,
}

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    owner: Option<SessionId>,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<String, Node>,
    sessions: HashSet<SessionId>,
    next_session: u64,
}

/// Thread-safe node tree.
#[derive(Debug, Default)]
pub struct NodeStore {
    inner: Mutex<Inner>,
}

fn validate_path(path: &str) -> Result<(), RegistryError> {
    let valid = path.len() > 1
        && path.starts_with('/')
        && !path.ends_with('/')
        && !path[1..].split('/').any(str::is_empty);
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidPath(path.to_string()))
    }
}

/// Parent path, `None` for top-level nodes.
fn parent_of(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", _)) | None => None,
        Some((parent, _)) => Some(parent),
    }
}

impl NodeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session.
    pub fn open_session(&self) -> SessionId {
        let mut inner = self.inner.lock();
        inner.next_session += 1;
        let id = SessionId(inner.next_session);
        inner.sessions.insert(id);
        id
    }

    /// End a session and delete its ephemeral nodes.
    ///
    /// Returns the deleted paths. Closing an unknown session is a no-op.
    pub fn close_session(&self, session: SessionId) -> Vec<String> {
        let mut inner = self.inner.lock();
        if !inner.sessions.remove(&session) {
            return Vec::new();
        }

        let owned: Vec<String> = inner
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();

        for path in &owned {
            inner.nodes.remove(path);
        }
        owned
    }

    /// Check if a session is open.
    pub fn is_live(&self, session: SessionId) -> bool {
        self.inner.lock().sessions.contains(&session)
    }

    /// Create a node.
    ///
    /// Re-creating an ephemeral node the same session already owns replaces
    /// its data, so a provider can re-register after a restart of its
    /// listener without first deleting.
    ///
    /// # Errors
    ///
    /// - `InvalidPath` for a malformed path
    /// - `NodeExists` if the node exists and is not this session's ephemeral node
    /// - `NotFound` if the parent does not exist
    /// - `Backend` if the session is closed or the parent is ephemeral
    pub fn create(
        &self,
        session: SessionId,
        path: &str,
        data: &[u8],
        mode: NodeMode,
    ) -> Result<(), RegistryError> {
        validate_path(path)?;

        let mut inner = self.inner.lock();
        if !inner.sessions.contains(&session) {
            return Err(RegistryError::Backend(format!("session {} expired", session)));
        }

        if let Some(parent) = parent_of(path) {
            match inner.nodes.get(parent) {
                None => return Err(RegistryError::NotFound(parent.to_string())),
                Some(node) if node.owner.is_some() => {
                    return Err(RegistryError::Backend(format!(
                        "ephemeral node {} cannot have children",
                        parent
                    )))
                }
                Some(_) => {}
            }
        }

        let owner = match mode {
            NodeMode::Persistent => None,
            NodeMode::Ephemeral => Some(session),
        };

        if let Some(existing) = inner.nodes.get_mut(path) {
            if owner.is_some() && existing.owner == owner {
                existing.data = data.to_vec();
                return Ok(());
            }
            return Err(RegistryError::NodeExists(path.to_string()));
        }

        inner.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                owner,
            },
        );
        Ok(())
    }

    /// Read a node's data.
    pub fn get(&self, path: &str) -> Result<Vec<u8>, RegistryError> {
        validate_path(path)?;
        self.inner
            .lock()
            .nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| RegistryError::NotFound(path.to_string()))
    }

    /// Delete a node that has no children.
    pub fn delete(&self, path: &str) -> Result<(), RegistryError> {
        validate_path(path)?;

        let mut inner = self.inner.lock();
        if !inner.nodes.contains_key(path) {
            return Err(RegistryError::NotFound(path.to_string()));
        }
        if has_children(&inner.nodes, path) {
            return Err(RegistryError::Backend(format!("node {} has children", path)));
        }
        inner.nodes.remove(path);
        Ok(())
    }

    /// Delete an ephemeral node owned by `session`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the node does not exist
    /// - `Backend` if the node is persistent or owned by another session
    pub fn delete_owned(&self, session: SessionId, path: &str) -> Result<(), RegistryError> {
        validate_path(path)?;

        let mut inner = self.inner.lock();
        match inner.nodes.get(path) {
            None => Err(RegistryError::NotFound(path.to_string())),
            Some(node) if node.owner == Some(session) => {
                inner.nodes.remove(path);
                Ok(())
            }
            Some(_) => Err(RegistryError::Backend(format!(
                "node {} is not owned by session {}",
                path, session
            ))),
        }
    }

    /// Names of the direct children of a node, sorted.
    pub fn children(&self, path: &str) -> Result<Vec<String>, RegistryError> {
        validate_path(path)?;

        let inner = self.inner.lock();
        if !inner.nodes.contains_key(path) {
            return Err(RegistryError::NotFound(path.to_string()));
        }

        let prefix = format!("{}/", path);
        Ok(inner
            .nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| &key[prefix.len()..])
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect())
    }

    /// Total number of nodes.
    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    /// Check if the store holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn has_children(nodes: &BTreeMap<String, Node>, path: &str) -> bool {
    let prefix = format!("{}/", path);
    nodes
        .range(prefix.clone()..)
        .next()
        .is_some_and(|(key, _)| key.starts_with(&prefix))
}
