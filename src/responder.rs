//! Host-side call dispatcher.
//!
//! The [`ResponderBuilder`] provides a fluent API for registering methods
//! and building a [`Responder`]. Once [`Responder::listen`] is called, every
//! inbound call is handled as follows:
//! 1. Reject requests without a `streamId` (logged, dispatch continues)
//! 2. Take a concurrency permit, or answer with an `error` event
//! 3. Register a transient listener that cancels the call on a matching
//!    `{streamIdToAbort}`
//! 4. Look up and invoke the method; unknown names become an `error` event
//! 5. Forward each value as `next`, then `complete` on exhaustion
//! 6. On failure send `error`, except cancellation which sends `complete`
//! 7. Dispose the abort listener and release the permit
//!
//! Calls are driven concurrently, each on its own task with its own
//! cancellation token.
//!
//! # Example
//!
//! ```ignore
//! use futures::stream;
//! use panelwire::Responder;
//!
//! let responder = Responder::builder()
//!     .method("count", |(n,): (u32,), _cancel| stream::iter((0..n).map(Ok)))
//!     .method_raw("echo", |args, _cancel| stream::iter(args.into_iter().map(Ok)))
//!     .max_concurrent_calls(64)
//!     .build(api)?;
//!
//! let registration = responder.listen()?;
//! // ... later
//! registration.dispose();
//! ```

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::adapter::{Listener, MessageApi, MESSAGE_EVENT};
use crate::config::RpcConfig;
use crate::error::{Result, RpcError};
use crate::handler::{Method, MethodRegistry, ValueStream};
use crate::protocol::{RequestMessage, ResponseMessage, StreamId};

/// Builder for configuring and creating a [`Responder`].
pub struct ResponderBuilder {
    registry: MethodRegistry,
    config: RpcConfig,
    first_error: Option<RpcError>,
}

impl ResponderBuilder {
    /// Create a new responder builder.
    pub fn new() -> Self {
        Self {
            registry: MethodRegistry::new(),
            config: RpcConfig::default(),
            first_error: None,
        }
    }

    /// Register a method whose arguments deserialize into `A`.
    pub fn method<F, A, S, T>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(A, CancellationToken) -> S + Send + Sync + 'static,
        A: DeserializeOwned + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
        T: Serialize + 'static,
    {
        let result = self.registry.register(name, handler);
        self.keep_error(result);
        self
    }

    /// Register a method over the raw argument list.
    pub fn method_raw<F, S>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Vec<Value>, CancellationToken) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Value>> + Send + 'static,
    {
        let result = self.registry.register_raw(name, handler);
        self.keep_error(result);
        self
    }

    /// Register any [`Method`] implementation.
    pub fn method_impl(mut self, name: &str, method: impl Method) -> Self {
        let result = self.registry.register_method(name, method);
        self.keep_error(result);
        self
    }

    /// Set the maximum number of concurrently driven calls.
    ///
    /// Calls over the limit are answered with an `error` event.
    /// Default: 256
    pub fn max_concurrent_calls(mut self, limit: usize) -> Self {
        self.config = self.config.max_concurrent_calls(limit);
        self
    }

    /// Log every envelope at debug level.
    pub fn log_messages(mut self, enabled: bool) -> Self {
        self.config = self.config.log_messages(enabled);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the responder over a host-side API.
    ///
    /// # Errors
    ///
    /// - the first registration error (duplicate or invalid method name)
    /// - `RuntimeUnavailable` if called outside a tokio runtime
    pub fn build<A>(self, api: Arc<A>) -> Result<Responder<A>>
    where
        A: MessageApi<Outbound = ResponseMessage, Inbound = RequestMessage>,
    {
        if let Some(e) = self.first_error {
            return Err(e);
        }
        Responder::new(api, self.registry, &self.config)
    }

    fn keep_error(&mut self, result: Result<crate::handler::MethodId>) {
        if let Err(e) = result {
            tracing::warn!(target: "panelwire::rpc", "method registration failed: {}", e);
            self.first_error.get_or_insert(e);
        }
    }
}

impl Default for ResponderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner<A> {
    api: Arc<A>,
    registry: MethodRegistry,
    semaphore: Arc<Semaphore>,
    max_concurrent_calls: usize,
    runtime: Handle,
    log_messages: bool,
}

/// Answers calls arriving on a host-side [`MessageApi`].
pub struct Responder<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for Responder<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Responder<()> {
    /// Create a new responder builder.
    pub fn builder() -> ResponderBuilder {
        ResponderBuilder::new()
    }
}

impl<A> Responder<A>
where
    A: MessageApi<Outbound = ResponseMessage, Inbound = RequestMessage>,
{
    /// Create a responder serving `registry`.
    ///
    /// Calls are spawned on the runtime current at construction.
    pub fn new(api: Arc<A>, registry: MethodRegistry, config: &RpcConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| RpcError::RuntimeUnavailable)?;
        let max_concurrent_calls = config.max_concurrent_calls.max(1);

        Ok(Self {
            inner: Arc::new(Inner {
                api,
                registry,
                semaphore: Arc::new(Semaphore::new(max_concurrent_calls)),
                max_concurrent_calls,
                runtime,
                log_messages: config.log_messages,
            }),
        })
    }

    /// The registered methods.
    pub fn registry(&self) -> &MethodRegistry {
        &self.inner.registry
    }

    /// Number of calls currently being driven.
    pub fn active_calls(&self) -> usize {
        self.inner.max_concurrent_calls - self.inner.semaphore.available_permits()
    }

    /// Start answering calls. Dropping or disposing the returned
    /// [`Registration`] stops dispatch of new calls.
    pub fn listen(&self) -> Result<Registration<A>> {
        let responder = self.clone();
        let listener = Listener::new(move |request: &RequestMessage| {
            if let Err(e) = responder.handle_request(request.clone()) {
                tracing::warn!(target: "panelwire::rpc", "rejected request: {}", e);
            }
        });
        self.inner
            .api
            .add_event_listener(MESSAGE_EVENT, listener.clone())?;

        Ok(Registration {
            api: self.inner.api.clone(),
            listener: Some(listener),
        })
    }

    /// Handle one inbound request.
    ///
    /// Abort requests are ignored here; each running call listens for its
    /// own abort.
    ///
    /// # Errors
    ///
    /// - `NonStreamingCall` if the request carries no `streamId`
    /// - an adapter error if the abort listener cannot be registered
    pub fn handle_request(&self, request: RequestMessage) -> Result<()> {
        let (stream_id, method, args) = match request {
            RequestMessage::Abort { .. } => return Ok(()),
            RequestMessage::Call {
                stream_id: None,
                method,
                ..
            } => return Err(RpcError::NonStreamingCall(method)),
            RequestMessage::Call {
                stream_id: Some(stream_id),
                method,
                args,
            } => (stream_id, method, args),
        };

        let inner = &self.inner;

        let permit = match inner.semaphore.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!(
                    target: "panelwire::rpc",
                    "call capacity reached, rejecting {} on stream {}",
                    method,
                    stream_id
                );
                let payload = RpcError::CapacityReached(inner.max_concurrent_calls).to_payload();
                return inner.api.post_message(ResponseMessage::error(stream_id, payload));
            }
        };

        let cancel = CancellationToken::new();
        let abort_listener = {
            let cancel = cancel.clone();
            let stream_id = stream_id.clone();
            Listener::new(move |request: &RequestMessage| {
                if let RequestMessage::Abort { stream_id_to_abort } = request {
                    if *stream_id_to_abort == stream_id {
                        cancel.cancel();
                    }
                }
            })
        };
        inner
            .api
            .add_event_listener(MESSAGE_EVENT, abort_listener.clone())?;
        let guard = AbortListenerGuard {
            api: inner.api.clone(),
            listener: abort_listener,
        };

        if inner.log_messages {
            let id = inner
                .registry
                .method_id(&method)
                .map_or_else(|| "unregistered".to_string(), |id| id.to_string());
            tracing::debug!(
                target: "panelwire::rpc",
                "dispatching {} ({}) on stream {}",
                method,
                id,
                stream_id
            );
        }

        let responder = self.clone();
        inner.runtime.spawn(async move {
            // Permit and abort listener are held until this task completes
            let _permit = permit;
            let _guard = guard;

            if let Err(e) = responder.drive(&stream_id, &method, args, cancel).await {
                tracing::error!(
                    target: "panelwire::rpc",
                    "call {} on stream {} failed: {}",
                    method,
                    stream_id,
                    e
                );
            }
        });

        Ok(())
    }

    async fn drive(
        &self,
        stream_id: &StreamId,
        method: &str,
        args: Vec<Value>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let api = &self.inner.api;

        let mut values: ValueStream = match self.inner.registry.invoke(method, args, cancel.clone()) {
            Ok(values) => values,
            Err(e) => {
                return api.post_message(ResponseMessage::error(stream_id.clone(), e.to_payload()));
            }
        };

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!(
                        target: "panelwire::rpc",
                        "stream {} aborted by caller",
                        stream_id
                    );
                    return api.post_message(ResponseMessage::complete(stream_id.clone()));
                }
                item = values.next() => match item {
                    Some(Ok(value)) => {
                        api.post_message(ResponseMessage::next(stream_id.clone(), value))?;
                    }
                    Some(Err(e)) if e.is_abort() => {
                        return api.post_message(ResponseMessage::complete(stream_id.clone()));
                    }
                    Some(Err(e)) => {
                        return api.post_message(ResponseMessage::error(stream_id.clone(), e.to_payload()));
                    }
                    None => {
                        return api.post_message(ResponseMessage::complete(stream_id.clone()));
                    }
                },
            }
        }
    }
}

/// Serve `registry` on `api` until the returned registration is disposed.
pub fn register_handlers<A>(
    api: Arc<A>,
    registry: MethodRegistry,
    config: &RpcConfig,
) -> Result<Registration<A>>
where
    A: MessageApi<Outbound = ResponseMessage, Inbound = RequestMessage>,
{
    Responder::new(api, registry, config)?.listen()
}

/// Removes a per-call abort listener when the call's task ends.
struct AbortListenerGuard<A>
where
    A: MessageApi<Inbound = RequestMessage>,
{
    api: Arc<A>,
    listener: Listener<RequestMessage>,
}

impl<A> Drop for AbortListenerGuard<A>
where
    A: MessageApi<Inbound = RequestMessage>,
{
    fn drop(&mut self) {
        if let Err(e) = self.api.remove_event_listener(MESSAGE_EVENT, &self.listener) {
            tracing::warn!(target: "panelwire::rpc", "failed to remove abort listener: {}", e);
        }
    }
}

/// Active dispatch registration. Stops dispatch when dropped.
#[must_use = "dropping a Registration stops the responder"]
pub struct Registration<A>
where
    A: MessageApi<Inbound = RequestMessage>,
{
    api: Arc<A>,
    listener: Option<Listener<RequestMessage>>,
}

impl<A> Registration<A>
where
    A: MessageApi<Inbound = RequestMessage>,
{
    /// Stop dispatching new calls. Calls already running finish normally.
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(listener) = self.listener.take() {
            if let Err(e) = self.api.remove_event_listener(MESSAGE_EVENT, &listener) {
                tracing::warn!(
                    target: "panelwire::rpc",
                    "failed to remove responder listener: {}",
                    e
                );
            }
        }
    }
}

impl<A> Drop for Registration<A>
where
    A: MessageApi<Inbound = RequestMessage>,
{
    fn drop(&mut self) {
        self.release();
    }
}
