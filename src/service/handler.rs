//! Method handlers.
//!
//! Every registered method is stored as a [`MethodHandler`]: raw request
//! bytes in, raw response bytes out. [`TypedHandler`] generates the
//! decode → invoke → encode step for a serde request/response pair, so the
//! dispatcher never needs to know a method's argument or return types.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::codec::MsgPackCodec;
use crate::error::{Result, RpcError};
use crate::protocol::{errcode, ErrorEnvelope};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure reported by a handler.
///
/// Sent back to the caller as `result{errcode, errmsg}`; the connection
/// stays open.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} (errcode {code})")]
pub struct MethodError {
    /// Non-zero error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
}

impl MethodError {
    /// Create an error with an explicit code.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create an error with [`errcode::HANDLER_FAILED`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(errcode::HANDLER_FAILED, message)
    }

    fn into_envelope_bytes(self) -> Result<Vec<u8>> {
        // errcode 0 would read as success on the caller side
        let code = if self.code == errcode::OK {
            errcode::HANDLER_FAILED
        } else {
            self.code
        };
        MsgPackCodec::encode(&ErrorEnvelope::new(code, self.message))
    }
}

/// Trait for handler functions.
///
/// An `Err` return means the request itself was unusable (payload did not
/// decode, response did not encode); the provider drops the connection.
/// Handler-level failures are encoded into the returned bytes.
pub trait MethodHandler: Send + Sync + 'static {
    /// Handle a request with raw payload bytes.
    fn call(&self, payload: Bytes) -> BoxFuture<'static, Result<Vec<u8>>>;
}

/// Wrapper that decodes the payload and encodes the response with MsgPack.
pub struct TypedHandler<F, Req, Resp, Fut>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<Resp, MethodError>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(Req) -> Fut>,
}

impl<F, Req, Resp, Fut> TypedHandler<F, Req, Resp, Fut>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<Resp, MethodError>> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Req, Resp, Fut> MethodHandler for TypedHandler<F, Req, Resp, Fut>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<Resp, MethodError>> + Send + 'static,
{
    fn call(&self, payload: Bytes) -> BoxFuture<'static, Result<Vec<u8>>> {
        let request: Req = match MsgPackCodec::decode(&payload) {
            Ok(v) => v,
            Err(e) => {
                let err = RpcError::Protocol(format!("undecodable request payload: {}", e));
                return Box::pin(async move { Err(err) });
            }
        };

        let fut = (self.handler)(request);
        Box::pin(async move {
            match fut.await {
                Ok(response) => MsgPackCodec::encode(&response),
                Err(e) => e.into_envelope_bytes(),
            }
        })
    }
}

/// Handler over raw bytes, for payloads that are not MsgPack.
pub struct RawHandler<F, Fut>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Vec<u8>, MethodError>> + Send + 'static,
{
    handler: F,
}

impl<F, Fut> RawHandler<F, Fut>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Vec<u8>, MethodError>> + Send + 'static,
{
    /// Create a new raw handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> MethodHandler for RawHandler<F, Fut>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Vec<u8>, MethodError>> + Send + 'static,
{
    fn call(&self, payload: Bytes) -> BoxFuture<'static, Result<Vec<u8>>> {
        let fut = (self.handler)(payload);
        Box::pin(async move {
            match fut.await {
                Ok(bytes) => Ok(bytes),
                Err(e) => e.into_envelope_bytes(),
            }
        })
    }
}
