//! Error types for panelwire.

use serde_json::{json, Value};
use thiserror::Error;

/// Main error type for all panelwire operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on a byte-stream transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (malformed envelope, unexpected shape, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A request without a `streamId` was received. Only streaming calls are
    /// supported at this boundary.
    #[error("non-streaming RPC calls are not supported (method {0:?})")]
    NonStreamingCall(String),

    /// No implementation is registered under the requested method name.
    #[error("invalid RPC call for method {0:?}")]
    InvalidMethod(String),

    /// The call arguments could not be converted to the method's input type.
    #[error("invalid arguments for method {method:?}: {reason}")]
    InvalidArguments {
        /// Method name.
        method: String,
        /// Deserialization failure.
        reason: String,
    },

    /// A method with this name was already registered.
    #[error("method {0:?} is already registered")]
    DuplicateMethod(String),

    /// Method names must be non-empty and free of whitespace.
    #[error("invalid method name {0:?}")]
    InvalidMethodName(String),

    /// `add_event_listener`/`remove_event_listener` called with an event type
    /// other than `"message"`.
    #[error("invalid event type {0}")]
    InvalidEventType(String),

    /// Error payload received from the peer in an `error` stream event.
    #[error("remote error: {}", display_payload(.0))]
    Remote(Value),

    /// The call was cancelled.
    #[error("call aborted")]
    Aborted,

    /// The responder is already driving its maximum number of calls.
    #[error("concurrent call limit of {0} reached")]
    CapacityReached(usize),

    /// No tokio runtime is available to drive the call.
    #[error("no tokio runtime available")]
    RuntimeUnavailable,

    /// Transport closed.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl RpcError {
    /// Build a remote error carrying an arbitrary payload.
    ///
    /// Method implementations return this to send a specific value in the
    /// `data` field of the `error` event.
    pub fn remote(payload: impl Into<Value>) -> Self {
        RpcError::Remote(payload.into())
    }

    /// Whether this error signals cancellation rather than a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, RpcError::Aborted)
    }

    /// The value carried across the boundary for this error.
    pub fn to_payload(&self) -> Value {
        match self {
            RpcError::Remote(payload) => payload.clone(),
            other => json!({ "message": other.to_string() }),
        }
    }
}

fn display_payload(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(s)) => s.clone(),
            _ => payload.to_string(),
        },
        other => other.to_string(),
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_payload_is_forwarded_verbatim() {
        let err = RpcError::remote("nope");
        assert_eq!(err.to_payload(), json!("nope"));
        assert_eq!(err.to_string(), "remote error: nope");
    }

    #[test]
    fn test_local_error_payload_has_message() {
        let err = RpcError::InvalidMethod("missing".into());
        assert_eq!(
            err.to_payload(),
            json!({ "message": "invalid RPC call for method \"missing\"" })
        );
    }

    #[test]
    fn test_remote_object_display_uses_message() {
        let err = RpcError::Remote(json!({ "message": "boom", "code": 3 }));
        assert_eq!(err.to_string(), "remote error: boom");
    }

    #[test]
    fn test_is_abort() {
        assert!(RpcError::Aborted.is_abort());
        assert!(!RpcError::ConnectionClosed.is_abort());
        assert!(!RpcError::remote("aborted").is_abort());
    }
}
