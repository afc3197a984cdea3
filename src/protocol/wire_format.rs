//! Wire format encoding and decoding.
//!
//! The request header is a MsgPack map preceded by its own length:
//!
//! ```text
//! ┌──────────┬────────────────────────────────────────────────┐
//! │ Length   │ { service_name, method_name, payload_size }    │
//! │ 4 bytes  │ MsgPack map, `Length` bytes                    │
//! │ uint32 BE│                                                │
//! └──────────┴────────────────────────────────────────────────┘
//! ```
//!
//! `payload_size` raw payload bytes follow the header.

use serde::{Deserialize, Serialize};

use crate::codec::MsgPackCodec;
use crate::error::{Result, RpcError};

/// Size of every length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum serialized header size (64 KiB).
pub const DEFAULT_MAX_HEADER_SIZE: u32 = 64 * 1024;

/// Default maximum payload or response size (64 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Per-call request envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Target service.
    pub service_name: String,
    /// Target method within the service.
    pub method_name: String,
    /// Exact number of payload bytes following the header.
    pub payload_size: u32,
}

impl RequestHeader {
    /// Create a new header.
    pub fn new(service_name: &str, method_name: &str, payload_size: u32) -> Self {
        Self {
            service_name: service_name.to_string(),
            method_name: method_name.to_string(),
            payload_size,
        }
    }

    /// Encode the header with its length prefix.
    ///
    /// # Example
    ///
    /// ```
    /// use beacon_rpc::protocol::{RequestHeader, LENGTH_PREFIX_SIZE};
    ///
    /// let header = RequestHeader::new("UserService", "Login", 12);
    /// let bytes = header.encode().unwrap();
    /// let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    /// assert_eq!(bytes.len(), LENGTH_PREFIX_SIZE + len);
    /// ```
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = MsgPackCodec::encode(self)?;
        let len = u32::try_from(body.len()).map_err(|_| {
            RpcError::Protocol(format!("header size {} does not fit u32", body.len()))
        })?;

        let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode the header body (the bytes after the length prefix).
    pub fn decode(body: &[u8]) -> Result<Self> {
        MsgPackCodec::decode(body)
            .map_err(|e| RpcError::Protocol(format!("undecodable request header: {}", e)))
    }

    /// Reject a payload larger than `max_payload_size`.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_size > max_payload_size {
            return Err(RpcError::Protocol(format!(
                "payload size {} exceeds maximum {}",
                self.payload_size, max_payload_size
            )));
        }
        Ok(())
    }

    /// `Service.Method`, used in logs and error messages.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.service_name, self.method_name)
    }
}

/// Encode a complete request: length prefix, header, payload.
///
/// # Errors
///
/// Returns `Protocol` if the payload length does not fit in `u32`.
pub fn encode_request(service_name: &str, method_name: &str, payload: &[u8]) -> Result<Vec<u8>> {
    let payload_size = u32::try_from(payload.len()).map_err(|_| {
        RpcError::Protocol(format!("payload size {} does not fit u32", payload.len()))
    })?;

    let header = RequestHeader::new(service_name, method_name, payload_size).encode()?;
    let mut buf = Vec::with_capacity(header.len() + payload.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode a length-prefixed header from the front of `buf`.
///
/// Returns the header and the number of bytes consumed (prefix + header);
/// the payload starts at that offset.
///
/// # Errors
///
/// Returns `Protocol` if `buf` ends before the declared header length or the
/// header bytes do not decode.
pub fn decode_header(buf: &[u8]) -> Result<(RequestHeader, usize)> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = buf
        .get(..LENGTH_PREFIX_SIZE)
        .and_then(|p| p.try_into().ok())
        .ok_or_else(|| {
            RpcError::Protocol(format!(
                "need {} length bytes, got {}",
                LENGTH_PREFIX_SIZE,
                buf.len()
            ))
        })?;

    let header_len = u32::from_be_bytes(prefix) as usize;
    let end = LENGTH_PREFIX_SIZE + header_len;
    let body = buf.get(LENGTH_PREFIX_SIZE..end).ok_or_else(|| {
        RpcError::Protocol(format!(
            "header declares {} bytes, only {} available",
            header_len,
            buf.len() - LENGTH_PREFIX_SIZE
        ))
    })?;

    Ok((RequestHeader::decode(body)?, end))
}
