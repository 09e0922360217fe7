//! In-process channel pair.
//!
//! Delivery is synchronous: `post_message` on one end runs the other end's
//! subscribers before returning. Order is therefore exactly send order.
//!
//! # Example
//!
//! ```
//! use panelwire::transport::{memory_channel, MessageChannel};
//! use serde_json::json;
//! use std::sync::{Arc, Mutex};
//!
//! let (panel, host) = memory_channel();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let _sub = host.on_message(Box::new(move |m| sink.lock().unwrap().push(m.clone())));
//!
//! panel.post_message(json!({ "command": "ready" })).unwrap();
//! assert_eq!(seen.lock().unwrap().len(), 1);
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use super::{HostChannel, MessageCallback, MessageChannel, PanelChannel};
use crate::error::Result;
use crate::observe::{Publisher, Subscription};

/// Create a connected panel/host channel pair.
pub fn memory_channel() -> (MemoryPanelChannel, MemoryHostChannel) {
    let to_host = Publisher::new();
    let to_panel = Publisher::new();

    let panel = MemoryPanelChannel {
        to_host: to_host.clone(),
        to_panel: to_panel.clone(),
        state: Arc::new(Mutex::new(Value::Null)),
    };
    let host = MemoryHostChannel { to_host, to_panel };

    (panel, host)
}

/// Panel end of an in-process channel.
#[derive(Clone)]
pub struct MemoryPanelChannel {
    to_host: Publisher<Value>,
    to_panel: Publisher<Value>,
    state: Arc<Mutex<Value>>,
}

impl MemoryPanelChannel {
    /// Number of panel-side subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.to_panel.subscriber_count()
    }
}

impl MessageChannel for MemoryPanelChannel {
    fn post_message(&self, message: Value) -> Result<()> {
        self.to_host.publish(&message);
        Ok(())
    }

    fn on_message(&self, callback: MessageCallback) -> Subscription {
        self.to_panel.subscribe(callback)
    }
}

impl PanelChannel for MemoryPanelChannel {
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

/// Host end of an in-process channel.
#[derive(Clone)]
pub struct MemoryHostChannel {
    to_host: Publisher<Value>,
    to_panel: Publisher<Value>,
}

impl MemoryHostChannel {
    /// Number of host-side subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.to_host.subscriber_count()
    }
}

impl MessageChannel for MemoryHostChannel {
    fn post_message(&self, message: Value) -> Result<()> {
        self.to_panel.publish(&message);
        Ok(())
    }

    fn on_message(&self, callback: MessageCallback) -> Subscription {
        self.to_host.subscribe(callback)
    }
}

impl HostChannel for MemoryHostChannel {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use serde_json::json;

    fn collect(channel: &impl MessageChannel) -> (Arc<Mutex<Vec<Value>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = channel.on_message(Box::new(move |m| sink.lock().unwrap().push(m.clone())));
        (seen, sub)
    }

    #[test]
    fn test_messages_cross_in_both_directions() {
        let (panel, host) = memory_channel();
        let (at_host, _h) = collect(&host);
        let (at_panel, _p) = collect(&panel);

        panel.post_message(json!(1)).unwrap();
        host.post_message(json!(2)).unwrap();

        assert_eq!(*at_host.lock().unwrap(), vec![json!(1)]);
        assert_eq!(*at_panel.lock().unwrap(), vec![json!(2)]);
    }

    #[test]
    fn test_dropped_subscription_stops_delivery() {
        let (panel, host) = memory_channel();
        let (at_host, sub) = collect(&host);
        assert_eq!(host.subscriber_count(), 1);

        drop(sub);
        panel.post_message(json!(1)).unwrap();

        assert!(at_host.lock().unwrap().is_empty());
        assert_eq!(host.subscriber_count(), 0);
    }

    #[test]
    fn test_panel_state() {
        let (panel, _host) = memory_channel();
        assert_eq!(panel.get_state(), Value::Null);

        panel.set_state(json!({ "scroll": 42 }));
        let clone = panel.clone();
        assert_eq!(clone.get_state(), json!({ "scroll": 42 }));
    }

    #[test]
    fn test_post_error_envelope() {
        let (panel, host) = memory_channel();
        let (at_panel, _p) = collect(&panel);

        host.post_error(&RpcError::remote("disk full")).unwrap();

        assert_eq!(
            *at_panel.lock().unwrap(),
            vec![json!({ "type": "error", "error": "disk full" })]
        );
    }
}
