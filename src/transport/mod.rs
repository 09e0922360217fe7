//! Transport module - raw bidirectional message channels.
//!
//! A raw channel moves side-specific envelopes (`serde_json::Value`) between
//! panel and host. It knows nothing about RPC; the adapters in
//! [`crate::adapter`] box and unbox RPC messages on top of it.
//!
//! Provides:
//! - [`MessageChannel`] - `post_message` + `on_message` subscription
//! - [`PanelChannel`] / [`HostChannel`] - side-specific extras
//! - [`memory_channel`] - connected in-process pair
//! - [`StreamChannel`] - newline-delimited JSON over `AsyncRead`/`AsyncWrite`

mod memory;
mod stream;

use serde_json::Value;

use crate::error::{Result, RpcError};
use crate::observe::Subscription;
use crate::protocol::error_envelope;

pub use memory::{memory_channel, MemoryHostChannel, MemoryPanelChannel};
pub use stream::StreamChannel;

/// Callback invoked for each inbound envelope.
pub type MessageCallback = Box<dyn Fn(&Value) + Send + Sync>;

/// A bidirectional, order-preserving message channel.
pub trait MessageChannel: Send + Sync + 'static {
    /// Send an envelope to the peer.
    fn post_message(&self, message: Value) -> Result<()>;

    /// Subscribe to inbound envelopes. Dropping the subscription
    /// unsubscribes.
    fn on_message(&self, callback: MessageCallback) -> Subscription;
}

/// Panel side of a channel. Carries opaque UI state that survives panel
/// reloads.
pub trait PanelChannel: MessageChannel {
    /// Current persisted state (`Value::Null` if never set).
    fn get_state(&self) -> Value;

    /// Replace the persisted state.
    fn set_state(&self, state: Value);
}

/// Host side of a channel.
pub trait HostChannel: MessageChannel {
    /// Notify the panel of a host-side failure outside any call.
    fn post_error(&self, error: &RpcError) -> Result<()> {
        self.post_message(error_envelope(error))
    }
}
