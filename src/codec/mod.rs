//! Codec module - encoding envelopes for byte-stream transports.
//!
//! - [`JsonCodec`] - newline-delimited JSON (one envelope per line)
//!
//! # Design
//!
//! [`JsonCodec`] is a `tokio_util` [`Decoder`](tokio_util::codec::Decoder) /
//! [`Encoder`](tokio_util::codec::Encoder), so byte-stream transports drive
//! it with `FramedRead`. [`JsonCodec::encode_line`] encodes a single line for
//! the writer task.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use panelwire::codec::JsonCodec;
//! use serde_json::json;
//! use tokio_util::codec::Decoder;
//!
//! let line = JsonCodec::encode_line(&json!({ "type": "rpc/response" })).unwrap();
//! assert!(line.ends_with(b"\n"));
//!
//! let mut buf = BytesMut::from(&line[..]);
//! let decoded = JsonCodec::new().decode(&mut buf).unwrap().unwrap();
//! assert_eq!(decoded["type"], "rpc/response");
//! ```

mod json;

pub use json::JsonCodec;
