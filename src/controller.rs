//! Per-call status object.
//!
//! An [`RpcController`] is handed to every call. Whichever layer first
//! detects a failure (registry lookup, transport, framing, response
//! decoding) marks it failed; the caller reads it once the call returns.
//!
//! # Example
//!
//! ```
//! use beacon_rpc::RpcController;
//!
//! let mut controller = RpcController::new();
//! controller.set_failed("connect failed: refused");
//! assert!(controller.failed());
//!
//! controller.reset();
//! assert!(!controller.failed());
//! assert_eq!(controller.error_text(), "");
//! ```

use crate::error::{RegistryError, RpcError};

/// Classification of a call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The registry has no entry for the method.
    RegistryNotFound,
    /// The coordination service could not be reached.
    RegistryUnreachable,
    /// Connect, read or write failed.
    Connection,
    /// A frame was malformed.
    Protocol,
    /// A connect or call deadline elapsed.
    Timeout,
    /// The response could not be decoded into the expected type.
    Decode,
    /// Set by application code through [`RpcController::set_failed`].
    Other,
}

impl FailureKind {
    /// Check if a fresh attempt could plausibly succeed.
    #[inline]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::RegistryUnreachable | FailureKind::Connection | FailureKind::Timeout
        )
    }

    /// Classify an error raised while performing a call.
    pub fn of(err: &RpcError) -> Self {
        match err {
            RpcError::Registry(RegistryError::NotFound(_)) => FailureKind::RegistryNotFound,
            RpcError::Registry(RegistryError::Unreachable(_)) => FailureKind::RegistryUnreachable,
            RpcError::Connection(_) | RpcError::Io(_) => FailureKind::Connection,
            RpcError::Timeout(_) => FailureKind::Timeout,
            RpcError::Protocol(_) | RpcError::MsgPackEncode(_) => FailureKind::Protocol,
            RpcError::MsgPackDecode(_) => FailureKind::Decode,
            RpcError::Registry(_) | RpcError::Config(_) => FailureKind::Other,
        }
    }
}

/// Failure status of one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcController {
    failed: bool,
    error_text: String,
    kind: Option<FailureKind>,
}

impl RpcController {
    /// Create a controller in the "not failed" state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear any failure so the controller can be attached to another call.
    pub fn reset(&mut self) {
        self.failed = false;
        self.error_text.clear();
        self.kind = None;
    }

    /// Check if the call failed.
    #[inline]
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Failure message, empty when the call did not fail.
    #[inline]
    pub fn error_text(&self) -> &str {
        &self.error_text
    }

    /// Mark the call failed. Calling it again overwrites the message.
    pub fn set_failed(&mut self, reason: impl Into<String>) {
        self.fail_with(FailureKind::Other, reason);
    }

    /// Kind of the recorded failure, if any.
    #[inline]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.kind
    }

    /// Check if the recorded failure is worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_some_and(FailureKind::is_retryable)
    }

    pub(crate) fn fail_with(&mut self, kind: FailureKind, reason: impl Into<String>) {
        self.failed = true;
        self.error_text = reason.into();
        self.kind = Some(kind);
    }

    /// Record `err` with its classified kind and its display text.
    pub(crate) fn fail_from(&mut self, err: &RpcError) {
        self.fail_with(FailureKind::of(err), err.to_string());
    }

    /// Request cancellation of the call.
    ///
    /// Not implemented: calls are bounded by the channel's connect and call
    /// timeouts instead. This is a no-op.
    pub fn start_cancel(&mut self) {
        tracing::debug!("start_cancel is not supported; ignoring");
    }

    /// Always `false`; see [`RpcController::start_cancel`].
    #[inline]
    pub fn is_canceled(&self) -> bool {
        false
    }

    /// Register a callback to run on cancellation.
    ///
    /// Since cancellation never happens, the callback is dropped unrun.
    pub fn notify_on_cancel<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        drop(callback);
    }
}
