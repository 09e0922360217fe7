//! Protocol module - message shapes, side envelopes and stream ids.
//!
//! This module implements the wire contract shared by panel and host:
//! - request/response messages (`RequestMessage`, `ResponseMessage`)
//! - side-specific boxing (`rpc/request` command, `rpc/response` type)
//! - stream id generation for correlating a call with its events

mod envelope;
mod message;
mod stream_id;

pub use envelope::{
    box_request, box_response, error_envelope, unbox_request, unbox_response,
    ERROR_ENVELOPE_TYPE, RPC_REQUEST_COMMAND, RPC_RESPONSE_TYPE,
};
pub use message::{RequestMessage, ResponseMessage, StreamEvent};
pub use stream_id::StreamId;
