//! Protocol module - wire format, framing, and the error envelope.
//!
//! Request on the wire:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┬─────────────────┐
//! │ header_len   │ RequestHeader (MsgPack map)  │ payload         │
//! │ u32 BE       │ header_len bytes             │ payload_size    │
//! └──────────────┴──────────────────────────────┴─────────────────┘
//! ```
//!
//! Response on the wire: `[u32 BE len][len bytes]`, the same length prefix
//! discipline as the request header.

mod envelope;
mod frame;
mod wire_format;

pub use envelope::{errcode, ErrorEnvelope, ResultCode};
pub use frame::{read_frame, read_payload, read_request_header, write_frame, write_request};
pub use wire_format::{
    decode_header, encode_request, RequestHeader, DEFAULT_MAX_HEADER_SIZE,
    DEFAULT_MAX_PAYLOAD_SIZE, LENGTH_PREFIX_SIZE,
};
