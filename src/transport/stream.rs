//! Byte-stream channel: newline-delimited JSON envelopes over any
//! `AsyncRead`/`AsyncWrite` pair (stdio, Unix socket, pipe, `duplex`).
//!
//! A reader task drives a `FramedRead` over [`JsonCodec`] and publishes each
//! envelope to subscribers in arrival order; a writer task (see
//! [`crate::writer`]) serializes outbound lines. Lines that are too long, not
//! UTF-8 or not JSON are logged and skipped so one corrupt line does not take
//! down the channel. Only end of stream or an I/O error stops the reader.
//!
//! # Example
//!
//! ```ignore
//! use panelwire::transport::StreamChannel;
//! use panelwire::RpcConfig;
//!
//! let channel = StreamChannel::spawn(tokio::io::stdin(), tokio::io::stdout(), &RpcConfig::default());
//! ```

use std::sync::{Mutex, PoisonError};

use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use super::{HostChannel, MessageCallback, MessageChannel, PanelChannel};
use crate::codec::JsonCodec;
use crate::config::RpcConfig;
use crate::error::Result;
use crate::observe::{Publisher, Subscription};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Channel over a byte stream. Usable on either side.
pub struct StreamChannel {
    writer: WriterHandle,
    inbound: Publisher<Value>,
    state: Mutex<Value>,
    closed: CancellationToken,
    reader_task: JoinHandle<()>,
    _writer_task: JoinHandle<Result<()>>,
}

impl StreamChannel {
    /// Spawn the reader and writer tasks. Must be called within a tokio
    /// runtime.
    pub fn spawn<R, W>(reader: R, writer: W, config: &RpcConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer, writer_task) = spawn_writer_task(writer, config.max_batch_size);
        let inbound = Publisher::new();
        let closed = CancellationToken::new();

        let codec = JsonCodec::with_max_line_length(config.max_line_length);
        let reader_task = tokio::spawn(read_loop(
            FramedRead::new(reader, codec),
            inbound.clone(),
            closed.clone(),
        ));

        Self {
            writer,
            inbound,
            state: Mutex::new(Value::Null),
            closed,
            reader_task,
            _writer_task: writer_task,
        }
    }

    /// Whether the inbound side has reached end of stream.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the inbound side reaches end of stream.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Outbound lines not yet written.
    pub fn pending_lines(&self) -> usize {
        self.writer.pending_count()
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop<R>(
    mut frames: FramedRead<R, JsonCodec>,
    inbound: Publisher<Value>,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(envelope) => inbound.publish(&envelope),
            Err(e) => {
                tracing::error!("read loop error: {}", e);
                break;
            }
        }
    }

    closed.cancel();
}

impl MessageChannel for StreamChannel {
    fn post_message(&self, message: Value) -> Result<()> {
        let line = JsonCodec::encode_line(&message)?;
        self.writer.send(line)
    }

    fn on_message(&self, callback: MessageCallback) -> Subscription {
        self.inbound.subscribe(callback)
    }
}

impl PanelChannel for StreamChannel {
    fn get_state(&self) -> Value {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, state: Value) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

impl HostChannel for StreamChannel {}
