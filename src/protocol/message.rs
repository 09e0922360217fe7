//! Request and response messages.
//!
//! Field names are part of the wire contract and serialize exactly as:
//!
//! ```text
//! Request:  { "streamId"?: string, "method": string, "args": Value[] }
//!         | { "streamIdToAbort": string }
//! Response: { "streamId"?: string, "streamEvent"?: "next" | "error" | "complete", "data"?: Value }
//! ```
//!
//! Absent optional fields are omitted on output, never written as `null`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StreamId;

/// Message sent from the panel (caller) to the host (responder).
///
/// The two shapes are discriminated by the presence of `method` versus
/// `streamIdToAbort`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestMessage {
    /// Invoke `method` with `args`.
    #[serde(rename_all = "camelCase")]
    Call {
        /// Present for streaming calls. Absent means single-value semantics,
        /// which the responder rejects.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stream_id: Option<StreamId>,
        /// Method name.
        method: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Cancel a previously issued streaming call.
    #[serde(rename_all = "camelCase")]
    Abort {
        /// Stream id of the call to cancel.
        stream_id_to_abort: StreamId,
    },
}

impl RequestMessage {
    /// Build a streaming call request.
    pub fn call(stream_id: StreamId, method: impl Into<String>, args: Vec<Value>) -> Self {
        RequestMessage::Call {
            stream_id: Some(stream_id),
            method: method.into(),
            args,
        }
    }

    /// Build an abort request.
    pub fn abort(stream_id: StreamId) -> Self {
        RequestMessage::Abort {
            stream_id_to_abort: stream_id,
        }
    }
}

/// Kind of event carried by a streaming response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEvent {
    /// One emitted value; the stream stays open.
    Next,
    /// The stream failed; `data` holds the error payload.
    Error,
    /// The stream finished successfully.
    Complete,
}

impl StreamEvent {
    /// Whether no further events may follow on the same stream.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, StreamEvent::Next)
    }
}

/// Message sent from the host (responder) to the panel (caller).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
    /// Stream this event belongs to. Absent for single-value responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<StreamId>,
    /// Event kind for streaming responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_event: Option<StreamEvent>,
    /// Emitted value or error payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseMessage {
    /// A `next` event carrying one value.
    pub fn next(stream_id: StreamId, data: Value) -> Self {
        Self {
            stream_id: Some(stream_id),
            stream_event: Some(StreamEvent::Next),
            data: Some(data),
        }
    }

    /// An `error` event carrying the error payload.
    pub fn error(stream_id: StreamId, data: Value) -> Self {
        Self {
            stream_id: Some(stream_id),
            stream_event: Some(StreamEvent::Error),
            data: Some(data),
        }
    }

    /// A `complete` event. Never carries data.
    pub fn complete(stream_id: StreamId) -> Self {
        Self {
            stream_id: Some(stream_id),
            stream_event: Some(StreamEvent::Complete),
            data: None,
        }
    }
}
