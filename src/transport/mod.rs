//! Transport module - TCP listener and connector.
//!
//! Every connection, provider or coordination service, is a plain TCP
//! stream with Nagle disabled; requests are small and latency-bound.

mod tcp;

pub use tcp::{connect, RpcListener};
