//! Dedicated writer task for byte-stream transports.
//!
//! Outbound envelopes are encoded into lines by the caller and handed to a
//! single writer task through an mpsc channel, so `post_message` never
//! blocks and never contends on the underlying writer.
//!
//! # Architecture
//!
//! ```text
//! Caller ─────┐
//! Responder 1 ┼─► mpsc::UnboundedSender<Bytes> ─► Writer Task ─► AsyncWrite
//! Responder N ┘
//! ```
//!
//! Lines that are ready together are written with one vectored write and a
//! single flush.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};

/// Handle for sending encoded lines to the writer task.
///
/// Cheaply cloneable; every clone feeds the same task, and lines from one
/// handle are written in the order they were sent.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<Bytes>,
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Queue a line for writing.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the writer task has exited.
    pub fn send(&self, line: Bytes) -> Result<()> {
        // Increment pending count BEFORE sending
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(line).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            RpcError::ConnectionClosed
        })
    }

    /// Lines queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the writer task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending lines.
///
/// The task exits cleanly once every handle is dropped, or with an error if
/// a write fails.
pub fn spawn_writer_task<W>(writer: W, max_batch_size: usize) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
    };

    let task = tokio::spawn(writer_loop(rx, writer, pending, max_batch_size.max(1)));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    max_batch_size: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(max_batch_size);

    loop {
        let first = match rx.recv().await {
            Some(line) => line,
            None => return Ok(()), // all handles dropped
        };

        batch.clear();
        batch.push(first);
        while batch.len() < max_batch_size {
            match rx.try_recv() {
                Ok(line) => batch.push(line),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::error!("writer task failed: {}", e);
            return Err(e);
        }

        pending.fetch_sub(batch.len(), Ordering::Release);
    }
}

/// Write a batch of lines with vectored writes, then flush once.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlices covering everything after the first `skip_bytes` of the batch.
fn remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for line in batch {
        let end = offset + line.len();
        if skip_bytes < end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&line[start..]));
        }
        offset = end;
    }

    slices
}
