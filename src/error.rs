//! Error types for beacon-rpc.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for transport, framing and dispatch operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on a socket or file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Malformed frame (truncated header, oversized length, undecodable bytes).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connect, read or write failure on the transport.
    #[error("connect failed: {0}")]
    Connection(String),

    /// A connect or call deadline elapsed.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// Service discovery failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Startup configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Service registry failures.
///
/// `NotFound` and `Unreachable` are kept apart so a caller can retry only
/// when the coordination service itself could not be reached.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No node exists at the requested path.
    #[error("service not found: {0}")]
    NotFound(String),

    /// The coordination service could not be reached.
    #[error("registry unreachable: {0}")]
    Unreachable(String),

    /// The node is already held by another live session.
    #[error("node already exists: {0}")]
    NodeExists(String),

    /// The node path is not a valid absolute path.
    #[error("invalid node path: {0}")]
    InvalidPath(String),

    /// Any other backend failure.
    #[error("registry backend error: {0}")]
    Backend(String),
}

impl RegistryError {
    /// Check if the failure is worth retrying.
    #[inline]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RegistryError::Unreachable(_))
    }
}

/// Startup configuration failures. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A non-comment line is not of the form `key=value`.
    #[error("malformed config line {line}: {content:?}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// Offending line.
        content: String,
    },

    /// A required key is absent.
    #[error("missing required config key `{0}`")]
    MissingKey(&'static str),

    /// A key has a value that cannot be parsed.
    #[error("invalid value {value:?} for config key `{key}`")]
    InvalidValue {
        /// Key name.
        key: String,
        /// Raw value.
        value: String,
    },
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
