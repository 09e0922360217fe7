//! Host demo - answers panel calls over stdio.
//!
//! Speaks newline-delimited JSON envelopes on stdin/stdout and logs to
//! stderr. Methods:
//! - `echo(...args)` streams its arguments back
//! - `count(n)` streams `{ index }` for `0..n`
//! - `ticker(interval_ms)` ticks until the panel cancels
//!
//! # Running
//!
//! ```text
//! $ printf '%s\n' '{"command":"rpc/request","message":{"streamId":"s1","method":"count","args":[3]}}' \
//!     | RUST_LOG=debug PANELWIRE_LOG_RPC=1 cargo run --example host
//! {"type":"rpc/response","message":{"streamId":"s1","streamEvent":"next","data":{"index":0}}}
//! ...
//! {"type":"rpc/response","message":{"streamId":"s1","streamEvent":"complete"}}
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use panelwire::{create_message_api_for_host, Responder, RpcConfig, RpcError, StreamChannel};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Item streamed by `count`.
#[derive(Serialize, Debug)]
struct Tick {
    index: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = RpcConfig::from_env();
    let channel = StreamChannel::spawn(tokio::io::stdin(), tokio::io::stdout(), &config);
    let api = Arc::new(create_message_api_for_host(channel, &config));

    let responder = Responder::builder()
        .method_raw("echo", |args: Vec<Value>, _cancel| {
            stream::iter(args.into_iter().map(Ok))
        })
        .method("count", |(n,): (u64,), _cancel| {
            stream::iter((0..n).map(|index| Ok::<_, RpcError>(Tick { index })))
        })
        .method("ticker", |(interval_ms,): (u64,), cancel: CancellationToken| {
            let interval = Duration::from_millis(interval_ms.max(1));
            stream::unfold(0u64, move |index| {
                let cancel = cancel.clone();
                async move {
                    tokio::select! {
                        _ = cancel.cancelled() => None,
                        _ = tokio::time::sleep(interval) => {
                            Some((Ok::<_, RpcError>(Tick { index }), index + 1))
                        }
                    }
                }
            })
        })
        .config(config)
        .build(api.clone())?;

    let registration = responder.listen()?;
    tracing::info!("host ready, methods: {:?}", responder.registry().names());

    api.channel().closed().await;

    registration.dispose();
    tracing::info!("panel disconnected, shutting down");
    Ok(())
}
