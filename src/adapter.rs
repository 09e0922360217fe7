//! Transport adapters.
//!
//! A [`MessageAdapter`] wraps a raw channel into a [`MessageApi`] speaking
//! plain RPC messages. Each side boxes what it sends and unboxes only the RPC
//! envelopes meant for it, ignoring all other traffic on the channel:
//!
//! | Side  | Sends             | Receives           |
//! |-------|-------------------|--------------------|
//! | panel | `RequestMessage`  | `ResponseMessage`  |
//! | host  | `ResponseMessage` | `RequestMessage`   |
//!
//! The side is fixed by the constructor ([`create_message_api_for_panel`],
//! [`create_message_api_for_host`]), so a caller can only be built on a
//! panel adapter and a responder only on a host adapter.
//!
//! Every registered [`Listener`] owns exactly one channel subscription.
//! Removing a listener drops its subscription; removing a listener that was
//! never added is a no-op.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::config::RpcConfig;
use crate::error::{Result, RpcError};
use crate::observe::Subscription;
use crate::protocol::{box_request, box_response, unbox_request, unbox_response};
use crate::protocol::{RequestMessage, ResponseMessage};
use crate::transport::{HostChannel, PanelChannel};

/// The only event type adapters support.
pub const MESSAGE_EVENT: &str = "message";

/// Which end of the channel an adapter serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The sandboxed UI panel (issues calls).
    Panel,
    /// The host process (answers calls).
    Host,
}

impl Role {
    fn outbound_label(self) -> &'static str {
        match self {
            Role::Panel => "panel->host",
            Role::Host => "host->panel",
        }
    }

    fn inbound_label(self) -> &'static str {
        match self {
            Role::Panel => "host->panel",
            Role::Host => "panel->host",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Panel => f.write_str("panel"),
            Role::Host => f.write_str("host"),
        }
    }
}

/// Message listener with identity.
///
/// Clones share identity: a clone removes the listener it was cloned from.
pub struct Listener<T> {
    callback: Arc<dyn Fn(&T) + Send + Sync>,
}

impl<T> Listener<T> {
    /// Wrap a callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Invoke the callback.
    #[inline]
    pub fn call(&self, message: &T) {
        (self.callback)(message)
    }

    /// Whether both handles refer to the same registered callback.
    pub fn same_as(&self, other: &Listener<T>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.callback), Arc::as_ptr(&other.callback))
    }
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
        }
    }
}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("ptr", &Arc::as_ptr(&self.callback).cast::<()>())
            .finish()
    }
}

/// Uniform send/subscribe interface over one side of a channel.
pub trait MessageApi: Send + Sync + 'static {
    /// Messages this side sends.
    type Outbound;
    /// Messages this side receives.
    type Inbound;

    /// Side served by this API.
    fn role(&self) -> Role;

    /// Send a message to the peer.
    fn post_message(&self, message: Self::Outbound) -> Result<()>;

    /// Register a listener for inbound messages.
    ///
    /// # Errors
    ///
    /// `InvalidEventType` if `event_type` is not `"message"`.
    fn add_event_listener(&self, event_type: &str, listener: Listener<Self::Inbound>) -> Result<()>;

    /// Remove a previously added listener. No-op if it is not registered.
    ///
    /// # Errors
    ///
    /// `InvalidEventType` if `event_type` is not `"message"`.
    fn remove_event_listener(
        &self,
        event_type: &str,
        listener: &Listener<Self::Inbound>,
    ) -> Result<()>;

    /// Number of currently registered listeners.
    fn listener_count(&self) -> usize;
}

/// An RPC message that can be boxed into / unboxed from a side envelope.
pub trait Envelope: fmt::Debug + Send + Sync + Sized + 'static {
    /// Box for sending.
    fn boxed(&self) -> Result<Value>;
    /// Unbox if `envelope` carries this kind of message.
    fn unboxed(envelope: &Value) -> Result<Option<Self>>;
}

impl Envelope for RequestMessage {
    fn boxed(&self) -> Result<Value> {
        box_request(self)
    }

    fn unboxed(envelope: &Value) -> Result<Option<Self>> {
        unbox_request(envelope)
    }
}

impl Envelope for ResponseMessage {
    fn boxed(&self) -> Result<Value> {
        box_response(self)
    }

    fn unboxed(envelope: &Value) -> Result<Option<Self>> {
        unbox_response(envelope)
    }
}

struct Registered<T> {
    listener: Listener<T>,
    _subscription: Subscription,
}

/// [`MessageApi`] implementation over a raw channel `C`.
pub struct MessageAdapter<C, Out, In> {
    channel: C,
    role: Role,
    log_messages: bool,
    listeners: Mutex<Vec<Registered<In>>>,
    _marker: PhantomData<fn(Out)>,
}

/// Panel-side adapter: sends requests, receives responses.
pub type PanelMessageApi<C> = MessageAdapter<C, RequestMessage, ResponseMessage>;

/// Host-side adapter: sends responses, receives requests.
pub type HostMessageApi<C> = MessageAdapter<C, ResponseMessage, RequestMessage>;

/// Wrap the panel end of a channel.
pub fn create_message_api_for_panel<C: PanelChannel>(
    channel: C,
    config: &RpcConfig,
) -> PanelMessageApi<C> {
    MessageAdapter::new(channel, Role::Panel, config)
}

/// Wrap the host end of a channel.
pub fn create_message_api_for_host<C: HostChannel>(
    channel: C,
    config: &RpcConfig,
) -> HostMessageApi<C> {
    MessageAdapter::new(channel, Role::Host, config)
}

impl<C, Out, In> MessageAdapter<C, Out, In> {
    fn new(channel: C, role: Role, config: &RpcConfig) -> Self {
        Self {
            channel,
            role,
            log_messages: config.log_messages,
            listeners: Mutex::new(Vec::new()),
            _marker: PhantomData,
        }
    }

    /// The wrapped channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<Registered<In>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: PanelChannel> PanelMessageApi<C> {
    /// Persisted panel state.
    pub fn state(&self) -> Value {
        self.channel.get_state()
    }

    /// Replace the persisted panel state.
    pub fn set_state(&self, state: Value) {
        self.channel.set_state(state)
    }
}

fn check_event_type(event_type: &str) -> Result<()> {
    if event_type == MESSAGE_EVENT {
        Ok(())
    } else {
        Err(RpcError::InvalidEventType(event_type.to_string()))
    }
}

impl<C, Out, In> MessageApi for MessageAdapter<C, Out, In>
where
    C: crate::transport::MessageChannel,
    Out: Envelope,
    In: Envelope,
{
    type Outbound = Out;
    type Inbound = In;

    fn role(&self) -> Role {
        self.role
    }

    fn post_message(&self, message: Out) -> Result<()> {
        if self.log_messages {
            tracing::debug!(target: "panelwire::rpc", "{}: {:?}", self.role.outbound_label(), message);
        }
        self.channel.post_message(message.boxed()?)
    }

    fn add_event_listener(&self, event_type: &str, listener: Listener<In>) -> Result<()> {
        check_event_type(event_type)?;

        let log_messages = self.log_messages;
        let label = self.role.inbound_label();
        let target = listener.clone();

        // Subscribe before taking the list lock; delivery never holds it.
        let subscription = self.channel.on_message(Box::new(move |envelope| {
            match In::unboxed(envelope) {
                Ok(Some(message)) => {
                    if log_messages {
                        tracing::debug!(target: "panelwire::rpc", "{}: {:?}", label, message);
                    }
                    target.call(&message);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    target: "panelwire::rpc",
                    "dropping malformed {} envelope: {}",
                    label,
                    e
                ),
            }
        }));

        self.lock_listeners().push(Registered {
            listener,
            _subscription: subscription,
        });
        Ok(())
    }

    fn remove_event_listener(&self, event_type: &str, listener: &Listener<In>) -> Result<()> {
        check_event_type(event_type)?;

        let removed = {
            let mut listeners = self.lock_listeners();
            listeners
                .iter()
                .position(|r| r.listener.same_as(listener))
                .map(|index| listeners.remove(index))
        };
        // Unsubscribes outside the list lock.
        drop(removed);
        Ok(())
    }

    fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }
}
