//! Payload codec.
//!
//! Request and response payloads, the request header and the
//! coordination-service messages are all MessagePack. Structs are written
//! as maps with field names, which is what lets a caller decode a generic
//! error envelope into its own response type.
//!
//! # Example
//!
//! ```
//! use beacon_rpc::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
