//! Error envelope carried inside a normal response frame.
//!
//! Every response schema is expected to carry a `result` field shaped like
//! [`ResultCode`]. When dispatch fails, the provider writes an
//! [`ErrorEnvelope`], which is a map holding only that field; decoding it
//! into the caller's response type (whose other fields default) yields a
//! response with `result.errcode != 0`.

use serde::{Deserialize, Serialize};

/// Numeric error codes used in [`ResultCode::errcode`].
pub mod errcode {
    /// Success.
    pub const OK: i32 = 0;
    /// No service with the requested name is registered.
    pub const SERVICE_NOT_FOUND: i32 = 1;
    /// The service exists but has no such method.
    pub const METHOD_NOT_FOUND: i32 = 2;
    /// The handler reported a failure without choosing a code.
    pub const HANDLER_FAILED: i32 = 3;
}

/// `result{errcode, errmsg}` substructure of every response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultCode {
    /// Zero on success.
    pub errcode: i32,
    /// Human-readable message, empty on success.
    pub errmsg: String,
}

impl ResultCode {
    /// A success result.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A failure result.
    pub fn error(errcode: i32, errmsg: impl Into<String>) -> Self {
        Self {
            errcode,
            errmsg: errmsg.into(),
        }
    }

    /// Check for `errcode == 0`.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.errcode == errcode::OK
    }
}

/// Response body written when a request cannot be served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The failure.
    pub result: ResultCode,
}

impl ErrorEnvelope {
    /// Create an envelope for the given code and message.
    pub fn new(errcode: i32, errmsg: impl Into<String>) -> Self {
        Self {
            result: ResultCode::error(errcode, errmsg),
        }
    }
}
