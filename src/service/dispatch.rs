//! Dispatch table: (service, method) → handler.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use super::descriptor::ServiceDescriptor;
use super::handler::MethodHandler;
use crate::codec::MsgPackCodec;
use crate::error::Result;
use crate::protocol::{errcode, ErrorEnvelope};

/// Result of looking up a request target.
pub enum DispatchOutcome {
    /// A handler exists.
    Found(Arc<dyn MethodHandler>),
    /// The request cannot be served; send this envelope back.
    Miss(ErrorEnvelope),
}

/// Immutable mapping from service name to descriptor.
///
/// Built once before the provider starts and shared read-only between
/// connection tasks.
#[derive(Debug, Default, Clone)]
pub struct DispatchTable {
    services: HashMap<String, ServiceDescriptor>,
}

impl DispatchTable {
    /// Build a table. A later descriptor with the same service name replaces
    /// an earlier one.
    pub fn new(descriptors: impl IntoIterator<Item = ServiceDescriptor>) -> Self {
        let mut services = HashMap::new();
        for descriptor in descriptors {
            let name = descriptor.name().to_string();
            if services.insert(name.clone(), descriptor).is_some() {
                tracing::warn!("service {} registered twice; keeping the later one", name);
            }
        }
        Self { services }
    }

    /// Look up the handler for a request.
    pub fn lookup(&self, service_name: &str, method_name: &str) -> DispatchOutcome {
        let Some(service) = self.services.get(service_name) else {
            return DispatchOutcome::Miss(ErrorEnvelope::new(
                errcode::SERVICE_NOT_FOUND,
                format!("service not found: {}", service_name),
            ));
        };

        match service.handler(method_name) {
            Some(handler) => DispatchOutcome::Found(handler.clone()),
            None => DispatchOutcome::Miss(ErrorEnvelope::new(
                errcode::METHOD_NOT_FOUND,
                format!("method not found: {}.{}", service_name, method_name),
            )),
        }
    }

    /// Dispatch in-process: look up, invoke, and return the response bytes
    /// exactly as the provider would write them.
    pub async fn dispatch(
        &self,
        service_name: &str,
        method_name: &str,
        payload: Bytes,
    ) -> Result<Vec<u8>> {
        match self.lookup(service_name, method_name) {
            DispatchOutcome::Found(handler) => handler.call(payload).await,
            DispatchOutcome::Miss(envelope) => MsgPackCodec::encode(&envelope),
        }
    }

    /// Every registered (service, method) pair, sorted.
    pub fn entries(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .services
            .values()
            .flat_map(|service| {
                service
                    .method_names()
                    .into_iter()
                    .map(move |method| (service.name(), method))
            })
            .collect();
        entries.sort_unstable();
        entries
    }

    /// Get a service descriptor.
    pub fn service(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.get(name)
    }

    /// Number of services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResultCode;
    use crate::service::MethodError;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Echo {
        text: String,
    }

    fn echo_service(name: &str, prefix: &'static str) -> ServiceDescriptor {
        ServiceDescriptor::new(name).method("Echo", move |req: Echo| async move {
            Ok::<_, MethodError>(Echo {
                text: format!("{}{}", prefix, req.text),
            })
        })
    }

    #[test]
    fn test_lookup_found_and_missing() {
        let table = DispatchTable::new([echo_service("EchoService", "")]);

        assert!(matches!(
            table.lookup("EchoService", "Echo"),
            DispatchOutcome::Found(_)
        ));

        match table.lookup("EchoService", "Shout") {
            DispatchOutcome::Miss(envelope) => {
                assert_eq!(envelope.result.errcode, errcode::METHOD_NOT_FOUND);
                assert!(envelope.result.errmsg.contains("not found"));
            }
            DispatchOutcome::Found(_) => panic!("unexpected handler"),
        }

        match table.lookup("Nope", "Echo") {
            DispatchOutcome::Miss(envelope) => {
                assert_eq!(envelope.result.errcode, errcode::SERVICE_NOT_FOUND);
            }
            DispatchOutcome::Found(_) => panic!("unexpected handler"),
        }
    }

    #[test]
    fn test_last_registration_wins() {
        let table = DispatchTable::new([
            echo_service("EchoService", "first:"),
            echo_service("EchoService", "second:"),
        ]);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_uses_later_descriptor() {
        let table = DispatchTable::new([
            echo_service("EchoService", "first:"),
            echo_service("EchoService", "second:"),
        ]);

        let payload = Bytes::from(MsgPackCodec::encode(&Echo { text: "x".into() }).unwrap());
        let out = table.dispatch("EchoService", "Echo", payload).await.unwrap();
        let echo: Echo = MsgPackCodec::decode(&out).unwrap();
        assert_eq!(echo.text, "second:x");
    }

    #[tokio::test]
    async fn test_dispatch_miss_encodes_envelope() {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct AnyResponse {
            result: ResultCode,
        }

        let table = DispatchTable::new([echo_service("EchoService", "")]);
        let out = table
            .dispatch("EchoService", "Missing", Bytes::new())
            .await
            .unwrap();
        let response: AnyResponse = MsgPackCodec::decode(&out).unwrap();
        assert_ne!(response.result.errcode, 0);
        assert!(!response.result.errmsg.is_empty());
    }

    #[test]
    fn test_entries_sorted() {
        let service = ServiceDescriptor::new("UserService")
            .raw_method("Register", |_b: Bytes| async { Ok(Vec::new()) })
            .raw_method("Login", |_b: Bytes| async { Ok(Vec::new()) });
        let table = DispatchTable::new([service, echo_service("EchoService", "")]);

        assert_eq!(
            table.entries(),
            vec![
                ("EchoService", "Echo"),
                ("UserService", "Login"),
                ("UserService", "Register"),
            ]
        );
    }
}
