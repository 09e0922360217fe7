//! Panel demo - spawns the host demo and calls it.
//!
//! The host's stdin/stdout become the message channel. Shows a plain call,
//! a typed call, a method error and a cancelled call.
//!
//! # Running
//!
//! ```text
//! $ cargo build --example host
//! $ RUST_LOG=info cargo run --example panel -- target/debug/examples/host
//! ```

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use panelwire::{create_message_api_for_panel, Caller, RpcConfig, StreamChannel};
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Deserialize, Debug)]
struct Tick {
    index: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let host_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "target/debug/examples/host".to_string());

    let mut child = Command::new(&host_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;
    let stdin = child.stdin.take().ok_or("host stdin unavailable")?;
    let stdout = child.stdout.take().ok_or("host stdout unavailable")?;

    let config = RpcConfig::from_env();
    let channel = StreamChannel::spawn(stdout, stdin, &config);
    let caller = Caller::new(Arc::new(create_message_api_for_panel(channel, &config)), &config);

    let mut echoed = caller.invoke("echo", vec![json!("hello"), json!({ "from": "panel" })], None);
    while let Some(value) = echoed.next().await {
        println!("echo: {}", value?);
    }

    let mut ticks = caller.invoke("count", vec![json!(3)], None).typed::<Tick>();
    while let Some(tick) = ticks.next().await {
        println!("count: {}", tick?.index);
    }

    let mut missing = caller.invoke("missing", vec![], None);
    if let Some(Err(e)) = missing.next().await {
        println!("missing: {}", e);
    }

    let cancel = CancellationToken::new();
    let timer = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        timer.cancel();
    });
    let mut ticker = caller.invoke("ticker", vec![json!(50)], Some(cancel));
    while let Some(tick) = ticker.next().await {
        println!("ticker: {}", tick?);
    }
    println!("ticker cancelled");

    // Closing the channel ends the host.
    drop((echoed, ticks, missing, ticker, caller));
    child.wait().await?;
    Ok(())
}
