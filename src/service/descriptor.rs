//! Service descriptors.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::handler::{MethodError, MethodHandler, RawHandler, TypedHandler};

/// A named service and the handlers of its methods.
///
/// Built with the fluent API before the provider starts, then frozen into
/// the provider's dispatch table.
#[derive(Clone)]
pub struct ServiceDescriptor {
    name: String,
    methods: HashMap<String, Arc<dyn MethodHandler>>,
}

impl ServiceDescriptor {
    /// Create an empty service.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            methods: HashMap::new(),
        }
    }

    /// Register a typed method. The payload is decoded into `Req` and the
    /// returned `Resp` encoded back with MsgPack.
    ///
    /// Registering the same method name twice keeps the later handler.
    pub fn method<F, Req, Resp, Fut>(self, method: &str, handler: F) -> Self
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        Fut: Future<Output = Result<Resp, MethodError>> + Send + 'static,
    {
        self.with_handler(method, TypedHandler::new(handler))
    }

    /// Register a method over raw payload bytes.
    pub fn raw_method<F, Fut>(self, method: &str, handler: F) -> Self
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, MethodError>> + Send + 'static,
    {
        self.with_handler(method, RawHandler::new(handler))
    }

    /// Register any [`MethodHandler`] implementation.
    pub fn with_handler<H: MethodHandler>(mut self, method: &str, handler: H) -> Self {
        if self
            .methods
            .insert(method.to_string(), Arc::new(handler))
            .is_some()
        {
            tracing::warn!("{}.{} registered twice; keeping the later handler", self.name, method);
        }
        self
    }

    /// Service name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a handler by method name.
    pub fn handler(&self, method: &str) -> Option<&Arc<dyn MethodHandler>> {
        self.methods.get(method)
    }

    /// Method names, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Check if no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .finish()
    }
}
