//! In-process registry backend.

use std::sync::Arc;

use super::store::{NodeMode, NodeStore, SessionId};
use super::{method_path, service_path, Endpoint, Registry};
use crate::error::RegistryError;
use crate::service::BoxFuture;

/// Registry backed by a shared [`NodeStore`].
///
/// Each handle owns one session. Handles created with [`MemoryRegistry::attach`]
/// share the store, so a provider and a caller in the same process (or test)
/// see each other's nodes. Dropping a handle ends its session.
#[derive(Debug)]
pub struct MemoryRegistry {
    store: Arc<NodeStore>,
    session: SessionId,
}

impl MemoryRegistry {
    /// Create a registry with a fresh store.
    pub fn new() -> Self {
        Self::attach(Arc::new(NodeStore::new()))
    }

    /// Open a new session on an existing store.
    pub fn attach(store: Arc<NodeStore>) -> Self {
        let session = store.open_session();
        Self { store, session }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    /// This handle's session.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// End the session without going through [`Registry::close`], the way a
    /// crashed process loses its session.
    pub fn expire(&self) {
        let removed = self.store.close_session(self.session);
        tracing::debug!("session {} expired, removed {:?}", self.session, removed);
    }

    fn register_sync(
        &self,
        service_name: &str,
        method_name: &str,
        endpoint: &Endpoint,
    ) -> Result<(), RegistryError> {
        match self.store.create(
            self.session,
            &service_path(service_name),
            b"",
            NodeMode::Persistent,
        ) {
            Ok(()) | Err(RegistryError::NodeExists(_)) => {}
            Err(e) => return Err(e),
        }

        self.store.create(
            self.session,
            &method_path(service_name, method_name),
            endpoint.to_string().as_bytes(),
            NodeMode::Ephemeral,
        )
    }

    fn lookup_sync(&self, service_name: &str, method_name: &str) -> Result<Endpoint, RegistryError> {
        let path = method_path(service_name, method_name);
        let data = self.store.get(&path)?;
        let text = String::from_utf8(data)
            .map_err(|_| RegistryError::Backend(format!("node {} holds non-UTF-8 data", path)))?;
        text.parse()
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry for MemoryRegistry {
    fn register<'a>(
        &'a self,
        service_name: &'a str,
        method_name: &'a str,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<(), RegistryError>> {
        Box::pin(async move { self.register_sync(service_name, method_name, endpoint) })
    }

    fn lookup<'a>(
        &'a self,
        service_name: &'a str,
        method_name: &'a str,
    ) -> BoxFuture<'a, Result<Endpoint, RegistryError>> {
        Box::pin(async move { self.lookup_sync(service_name, method_name) })
    }

    fn unregister<'a>(
        &'a self,
        service_name: &'a str,
        method_name: &'a str,
    ) -> BoxFuture<'a, Result<(), RegistryError>> {
        Box::pin(async move {
            match self
                .store
                .delete_owned(self.session, &method_path(service_name, method_name))
            {
                Ok(()) | Err(RegistryError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.store.close_session(self.session);
        })
    }
}

impl Drop for MemoryRegistry {
    fn drop(&mut self) {
        self.store.close_session(self.session);
    }
}
