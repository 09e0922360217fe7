//! # panelwire
//!
//! Bidirectional streaming RPC between a sandboxed UI panel and its host
//! over a postMessage-style channel.
//!
//! The panel calls a named method and consumes the results as a `Stream`;
//! the host answers by driving a registered implementation and forwarding
//! each value. Many calls share one channel, correlated by stream id, and
//! the panel can cancel any call mid-flight.
//!
//! ## Architecture
//!
//! - **Transport** ([`transport`]): raw envelopes, in-process or newline-delimited
//!   JSON over any byte stream
//! - **Adapter** ([`adapter`]): boxes/unboxes RPC messages for one side
//! - **Caller** ([`caller`]): panel side, one lazy [`CallStream`] per call
//! - **Responder** ([`responder`]): host side, dispatches to a [`MethodRegistry`]
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use futures::{stream, StreamExt};
//! use panelwire::{memory_channel, Caller, Responder, RpcConfig};
//! use panelwire::adapter::{create_message_api_for_host, create_message_api_for_panel};
//!
//! #[tokio::main]
//! async fn main() -> panelwire::Result<()> {
//!     let config = RpcConfig::from_env();
//!     let (panel, host) = memory_channel();
//!
//!     let responder = Responder::builder()
//!         .method("count", |(n,): (u32,), _cancel| stream::iter((0..n).map(Ok)))
//!         .config(config.clone())
//!         .build(Arc::new(create_message_api_for_host(host, &config)))?;
//!     let _registration = responder.listen()?;
//!
//!     let caller = Caller::new(Arc::new(create_message_api_for_panel(panel, &config)), &config);
//!     let mut values = caller.invoke("count", vec![3.into()], None).typed::<u32>();
//!     while let Some(n) = values.next().await {
//!         println!("{}", n?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod caller;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod observe;
pub mod protocol;
pub mod responder;
pub mod transport;
pub mod writer;

pub use adapter::{
    create_message_api_for_host, create_message_api_for_panel, HostMessageApi, Listener,
    MessageApi, PanelMessageApi, Role,
};
pub use caller::{CallStream, Caller, MethodProxy};
pub use config::RpcConfig;
pub use error::{Result, RpcError};
pub use handler::{Method, MethodRegistry};
pub use protocol::{RequestMessage, ResponseMessage, StreamEvent, StreamId};
pub use responder::{register_handlers, Registration, Responder, ResponderBuilder};
pub use transport::{memory_channel, HostChannel, MessageChannel, PanelChannel, StreamChannel};
