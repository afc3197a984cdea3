//! Typed caller-side proxy.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::channel::RpcChannel;
use crate::codec::MsgPackCodec;
use crate::controller::{FailureKind, RpcController};

/// Proxy for one remote service.
///
/// Encodes requests and decodes responses with MsgPack. On failure the
/// controller is marked failed and `Resp::default()` is returned, so a
/// response type should be `#[serde(default)]` and carry a
/// [`ResultCode`](crate::protocol::ResultCode) to also receive handler
/// and dispatch errors.
///
/// # Example
///
/// ```ignore
/// let stub = ServiceStub::new(channel, "UserService");
/// let mut controller = RpcController::new();
/// let response: LoginResponse = stub.call("Login", &request, &mut controller).await;
/// if controller.failed() {
///     eprintln!("{}", controller.error_text());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ServiceStub {
    channel: Arc<RpcChannel>,
    service_name: String,
}

impl ServiceStub {
    /// Create a stub for `service_name`.
    pub fn new(channel: Arc<RpcChannel>, service_name: &str) -> Self {
        Self {
            channel,
            service_name: service_name.to_string(),
        }
    }

    /// Remote service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Call `method_name` and decode the response.
    ///
    /// The controller is reset first; on failure it is marked failed and
    /// `Resp::default()` is returned.
    pub async fn call<Req, Resp>(
        &self,
        method_name: &str,
        request: &Req,
        controller: &mut RpcController,
    ) -> Resp
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned + Default,
    {
        controller.reset();
        let payload = match MsgPackCodec::encode(request) {
            Ok(payload) => payload,
            Err(e) => {
                controller.fail_from(&e);
                return Resp::default();
            }
        };

        let response = match self
            .channel
            .try_call(&self.service_name, method_name, &payload)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("call {}.{} failed: {}", self.service_name, method_name, e);
                controller.fail_from(&e);
                return Resp::default();
            }
        };

        match MsgPackCodec::decode(&response) {
            Ok(decoded) => decoded,
            Err(e) => {
                controller.fail_with(
                    FailureKind::Decode,
                    format!("undecodable {}.{} response: {}", self.service_name, method_name, e),
                );
                Resp::default()
            }
        }
    }
}
