//! Side-specific envelopes.
//!
//! Raw channels carry other traffic besides RPC, so RPC messages are boxed:
//!
//! - panel → host: `{ "command": "rpc/request", "message": RequestMessage }`
//! - host → panel: `{ "type": "rpc/response", "message": ResponseMessage }`
//!
//! Unboxing returns `Ok(None)` for envelopes of any other kind so adapters
//! can ignore them.

use serde_json::{json, Value};

use super::{RequestMessage, ResponseMessage};
use crate::error::{Result, RpcError};

/// `command` tag of panel → host RPC envelopes.
pub const RPC_REQUEST_COMMAND: &str = "rpc/request";

/// `type` tag of host → panel RPC envelopes.
pub const RPC_RESPONSE_TYPE: &str = "rpc/response";

/// `type` tag of host → panel error notifications.
pub const ERROR_ENVELOPE_TYPE: &str = "error";

/// Box a request for the panel → host channel.
pub fn box_request(message: &RequestMessage) -> Result<Value> {
    Ok(json!({
        "command": RPC_REQUEST_COMMAND,
        "message": serde_json::to_value(message)?,
    }))
}

/// Box a response for the host → panel channel.
pub fn box_response(message: &ResponseMessage) -> Result<Value> {
    Ok(json!({
        "type": RPC_RESPONSE_TYPE,
        "message": serde_json::to_value(message)?,
    }))
}

/// Host → panel notification of a host-side failure outside any call.
pub fn error_envelope(error: &RpcError) -> Value {
    json!({
        "type": ERROR_ENVELOPE_TYPE,
        "error": error.to_payload(),
    })
}

/// Extract the request from a panel → host envelope.
///
/// Returns `Ok(None)` if the envelope is not an RPC request.
pub fn unbox_request(envelope: &Value) -> Result<Option<RequestMessage>> {
    unbox(envelope, "command", RPC_REQUEST_COMMAND)
}

/// Extract the response from a host → panel envelope.
///
/// Returns `Ok(None)` if the envelope is not an RPC response.
pub fn unbox_response(envelope: &Value) -> Result<Option<ResponseMessage>> {
    unbox(envelope, "type", RPC_RESPONSE_TYPE)
}

fn unbox<T: serde::de::DeserializeOwned>(
    envelope: &Value,
    tag_field: &str,
    tag: &str,
) -> Result<Option<T>> {
    if envelope.get(tag_field).and_then(Value::as_str) != Some(tag) {
        return Ok(None);
    }

    let message = envelope
        .get("message")
        .ok_or_else(|| RpcError::Protocol(format!("{} envelope without message", tag)))?;

    Ok(Some(T::deserialize(message)?))
}
