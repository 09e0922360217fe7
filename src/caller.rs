//! Panel-side caller.
//!
//! [`Caller::invoke`] turns a method call into a [`CallStream`]: a lazy,
//! single-pass `Stream` of the values the host emits for that call.
//!
//! Nothing is sent until the stream is first polled. On first poll the
//! stream:
//! 1. registers a listener that accepts only responses tagged with its
//!    stream id
//! 2. starts watching the optional cancellation token
//! 3. posts `{streamId, method, args}`
//!
//! Each poll then yields the oldest queued value, raises a pending error,
//! ends on completion, or parks its waker until the listener delivers the
//! next event. Only one task may poll a given `CallStream` at a time; the
//! waker slot holds a single waiter.
//!
//! Cancellation ends the stream at once (queued values are discarded) and
//! sends `{streamIdToAbort}` without waiting for any acknowledgment.
//! Dropping a started stream before it terminates does the same.
//!
//! # Example
//!
//! ```ignore
//! use futures::StreamExt;
//!
//! let caller = Caller::new(api, &RpcConfig::default());
//! let mut values = caller.invoke("chat/history", vec![], None);
//! while let Some(value) = values.next().await {
//!     println!("{}", value?);
//! }
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::adapter::{Listener, MessageApi, MESSAGE_EVENT};
use crate::config::RpcConfig;
use crate::error::{Result, RpcError};
use crate::protocol::{RequestMessage, ResponseMessage, StreamEvent, StreamId};

/// Issues calls over a panel-side [`MessageApi`].
pub struct Caller<A> {
    api: Arc<A>,
    log_messages: bool,
}

impl<A> Clone for Caller<A> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            log_messages: self.log_messages,
        }
    }
}

impl<A> Caller<A>
where
    A: MessageApi<Outbound = RequestMessage, Inbound = ResponseMessage>,
{
    /// Create a caller over a panel-side API.
    pub fn new(api: Arc<A>, config: &RpcConfig) -> Self {
        Self {
            api,
            log_messages: config.log_messages,
        }
    }

    /// The underlying message API.
    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// Call `method` and stream its values.
    ///
    /// Every invocation uses a brand-new stream id. If `cancel` fires, the
    /// stream ends immediately and the host is asked to stop.
    pub fn invoke(
        &self,
        method: impl Into<String>,
        args: Vec<Value>,
        cancel: Option<CancellationToken>,
    ) -> CallStream<A> {
        let stream_id = StreamId::generate();
        let state = Arc::new(Mutex::new(PendingCall::default()));

        CallStream {
            abort: AbortSignal {
                api: self.api.clone(),
                stream_id: stream_id.clone(),
                state: state.clone(),
                sent: false,
                log_messages: self.log_messages,
            },
            stream_id,
            state,
            phase: Phase::Idle {
                method: method.into(),
                args,
            },
            cancel,
            listener: None,
            cancelled: None,
        }
    }

    /// A reusable handle bound to one method name.
    pub fn proxy(&self, method: impl Into<String>) -> MethodProxy<A> {
        MethodProxy {
            caller: self.clone(),
            method: method.into(),
        }
    }
}

/// A [`Caller`] bound to one method.
pub struct MethodProxy<A> {
    caller: Caller<A>,
    method: String,
}

impl<A> MethodProxy<A>
where
    A: MessageApi<Outbound = RequestMessage, Inbound = ResponseMessage>,
{
    /// Method name this proxy calls.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Issue a new call.
    pub fn call(&self, args: Vec<Value>, cancel: Option<CancellationToken>) -> CallStream<A> {
        if self.caller.log_messages {
            tracing::debug!(target: "panelwire::rpc", "call method={} args={:?}", self.method, args);
        }
        self.caller.invoke(self.method.clone(), args, cancel)
    }
}

/// Per-call state shared between the response listener and the consumer.
#[derive(Default)]
struct PendingCall {
    queue: VecDeque<Value>,
    thrown: Option<Value>,
    finished: bool,
    cancelled: bool,
    waker: Option<Waker>,
}

impl PendingCall {
    fn take_waker(&mut self) -> Option<Waker> {
        self.waker.take()
    }
}

fn lock(state: &Mutex<PendingCall>) -> MutexGuard<'_, PendingCall> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Route one response into the call's state if it belongs to `stream_id`.
fn deliver(state: &Mutex<PendingCall>, stream_id: &StreamId, message: &ResponseMessage) {
    if message.stream_id.as_ref() != Some(stream_id) {
        return;
    }

    let waker = {
        let mut st = lock(state);
        // Nothing is accepted after a terminal event.
        if st.finished || st.thrown.is_some() {
            return;
        }
        match message.stream_event {
            Some(StreamEvent::Next) => {
                st.queue
                    .push_back(message.data.clone().unwrap_or(Value::Null));
            }
            Some(StreamEvent::Error) => {
                st.thrown = Some(message.data.clone().unwrap_or(Value::Null));
            }
            Some(StreamEvent::Complete) => st.finished = true,
            None => {
                tracing::warn!(
                    target: "panelwire::rpc",
                    "ignoring response without streamEvent on stream {}",
                    stream_id
                );
                return;
            }
        }
        st.take_waker()
    };

    if let Some(waker) = waker {
        waker.wake();
    }
}

/// Marks the call cancelled and tells the host, at most once.
struct AbortSignal<A> {
    api: Arc<A>,
    stream_id: StreamId,
    state: Arc<Mutex<PendingCall>>,
    sent: bool,
    log_messages: bool,
}

impl<A> AbortSignal<A>
where
    A: MessageApi<Outbound = RequestMessage, Inbound = ResponseMessage>,
{
    fn fire(&mut self) {
        let waker = {
            let mut st = lock(&self.state);
            st.finished = true;
            st.cancelled = true;
            st.take_waker()
        };
        if let Some(waker) = waker {
            waker.wake();
        }

        if std::mem::replace(&mut self.sent, true) {
            return;
        }
        if self.log_messages {
            tracing::debug!(target: "panelwire::rpc", "panel->host: aborting stream {}", self.stream_id);
        }
        if let Err(e) = self
            .api
            .post_message(RequestMessage::abort(self.stream_id.clone()))
        {
            tracing::warn!(
                target: "panelwire::rpc",
                "failed to send abort for stream {}: {}",
                self.stream_id,
                e
            );
        }
    }
}

enum Phase {
    Idle { method: String, args: Vec<Value> },
    Running,
    Done,
}

/// Values emitted by one call. See the [module docs](self).
pub struct CallStream<A>
where
    A: MessageApi<Outbound = RequestMessage, Inbound = ResponseMessage>,
{
    stream_id: StreamId,
    state: Arc<Mutex<PendingCall>>,
    phase: Phase,
    cancel: Option<CancellationToken>,
    abort: AbortSignal<A>,
    listener: Option<Listener<ResponseMessage>>,
    cancelled: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
}

impl<A> CallStream<A>
where
    A: MessageApi<Outbound = RequestMessage, Inbound = ResponseMessage>,
{
    /// Stream id correlating this call's request and responses.
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Whether the request has been sent and the call has not terminated.
    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running)
    }

    /// Deserialize each value into `T`.
    pub fn typed<T: DeserializeOwned>(self) -> impl Stream<Item = Result<T>> {
        self.map(|item| item.and_then(|value| Ok(serde_json::from_value(value)?)))
    }

    fn start(&mut self, method: String, args: Vec<Value>) -> Result<()> {
        let state = self.state.clone();
        let stream_id = self.stream_id.clone();
        let listener = Listener::new(move |message: &ResponseMessage| {
            deliver(&state, &stream_id, message)
        });
        self.abort
            .api
            .add_event_listener(MESSAGE_EVENT, listener.clone())?;
        self.listener = Some(listener);

        // Polled by `poll_next`; a cancel wakes the consumer directly.
        self.cancelled = self
            .cancel
            .clone()
            .map(|token| Box::pin(token.cancelled_owned()));

        self.phase = Phase::Running;
        self.abort.api.post_message(RequestMessage::call(
            self.stream_id.clone(),
            method,
            args,
        ))
    }

    /// Terminal transition: release the listener and the token watcher.
    fn finish(&mut self) {
        self.phase = Phase::Done;
        if let Some(listener) = self.listener.take() {
            if let Err(e) = self.abort.api.remove_event_listener(MESSAGE_EVENT, &listener) {
                tracing::warn!(
                    target: "panelwire::rpc",
                    "failed to remove listener for stream {}: {}",
                    self.stream_id,
                    e
                );
            }
        }
        self.cancelled = None;
    }
}

impl<A> Stream for CallStream<A>
where
    A: MessageApi<Outbound = RequestMessage, Inbound = ResponseMessage>,
{
    type Item = Result<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        match std::mem::replace(&mut this.phase, Phase::Running) {
            Phase::Done => {
                this.phase = Phase::Done;
                return Poll::Ready(None);
            }
            Phase::Idle { method, args } => {
                if this.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                    this.finish();
                    return Poll::Ready(None);
                }
                if let Err(e) = this.start(method, args) {
                    this.finish();
                    return Poll::Ready(Some(Err(e)));
                }
            }
            Phase::Running => {}
        }

        if let Some(cancelled) = this.cancelled.as_mut() {
            if cancelled.as_mut().poll(cx).is_ready() {
                this.abort.fire();
                this.finish();
                return Poll::Ready(None);
            }
        }

        let mut st = lock(&this.state);
        if st.cancelled {
            drop(st);
            this.finish();
            return Poll::Ready(None);
        }
        if let Some(value) = st.queue.pop_front() {
            return Poll::Ready(Some(Ok(value)));
        }
        if let Some(payload) = st.thrown.take() {
            drop(st);
            this.finish();
            return Poll::Ready(Some(Err(RpcError::Remote(payload))));
        }
        if st.finished {
            drop(st);
            this.finish();
            return Poll::Ready(None);
        }

        st.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<A> Drop for CallStream<A>
where
    A: MessageApi<Outbound = RequestMessage, Inbound = ResponseMessage>,
{
    fn drop(&mut self) {
        if self.is_running() {
            let terminated = {
                let st = lock(&self.state);
                st.finished || st.thrown.is_some()
            };
            // Abandoned mid-call: let the host stop producing.
            if !terminated {
                self.abort.fire();
            }
        }
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{create_message_api_for_panel, PanelMessageApi};
    use crate::protocol::{box_response, unbox_request};
    use crate::transport::{memory_channel, MemoryHostChannel, MemoryPanelChannel, MessageChannel};
    use futures::task::noop_waker_ref;
    use serde_json::json;
    use std::time::Duration;

    type Api = PanelMessageApi<MemoryPanelChannel>;

    struct Harness {
        caller: Caller<Api>,
        host: MemoryHostChannel,
        requests: Arc<Mutex<Vec<RequestMessage>>>,
        _sub: crate::observe::Subscription,
    }

    fn harness() -> Harness {
        let (panel, host) = memory_channel();
        let api = Arc::new(create_message_api_for_panel(panel, &RpcConfig::default()));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let sink = requests.clone();
        let sub = host.on_message(Box::new(move |m| {
            if let Ok(Some(req)) = unbox_request(m) {
                sink.lock().unwrap().push(req);
            }
        }));
        Harness {
            caller: Caller::new(api, &RpcConfig::default()),
            host,
            requests,
            _sub: sub,
        }
    }

    impl Harness {
        fn respond(&self, message: ResponseMessage) {
            self.host
                .post_message(box_response(&message).unwrap())
                .unwrap();
        }

        fn sent(&self) -> Vec<RequestMessage> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn poll_once<S: Stream + Unpin>(stream: &mut S) -> Poll<Option<S::Item>> {
        let mut cx = Context::from_waker(noop_waker_ref());
        Pin::new(stream).poll_next(&mut cx)
    }

    #[test]
    fn test_nothing_sent_before_first_poll() {
        let h = harness();
        let stream = h.caller.invoke("echo", vec![], None);
        assert!(h.sent().is_empty());
        assert_eq!(h.caller.api().listener_count(), 0);
        drop(stream);
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_first_poll_registers_listener_and_sends_call() {
        let h = harness();
        let mut stream = h.caller.invoke("echo", vec![json!(1)], None);

        assert!(poll_once(&mut stream).is_pending());
        assert_eq!(h.caller.api().listener_count(), 1);
        assert_eq!(
            h.sent(),
            vec![RequestMessage::call(stream.stream_id().clone(), "echo", vec![json!(1)])]
        );
    }

    #[test]
    fn test_queue_then_error_then_end() {
        let h = harness();
        let mut stream = h.caller.invoke("boom", vec![], None);
        assert!(poll_once(&mut stream).is_pending());
        let id = stream.stream_id().clone();

        h.respond(ResponseMessage::next(id.clone(), json!("x")));
        h.respond(ResponseMessage::error(id.clone(), json!("nope")));
        h.respond(ResponseMessage::next(id, json!("late")));

        assert!(matches!(poll_once(&mut stream), Poll::Ready(Some(Ok(v))) if v == json!("x")));
        assert!(matches!(
            poll_once(&mut stream),
            Poll::Ready(Some(Err(RpcError::Remote(p)))) if p == json!("nope")
        ));
        assert!(matches!(poll_once(&mut stream), Poll::Ready(None)));
        assert_eq!(h.caller.api().listener_count(), 0);
    }

    #[test]
    fn test_foreign_stream_ids_are_ignored() {
        let h = harness();
        let mut stream = h.caller.invoke("echo", vec![], None);
        assert!(poll_once(&mut stream).is_pending());

        h.respond(ResponseMessage::next(StreamId::from("other"), json!("nope")));
        assert!(poll_once(&mut stream).is_pending());

        h.respond(ResponseMessage::complete(stream.stream_id().clone()));
        assert!(matches!(poll_once(&mut stream), Poll::Ready(None)));
    }

    #[test]
    fn test_next_without_data_yields_null() {
        let h = harness();
        let mut stream = h.caller.invoke("echo", vec![], None);
        assert!(poll_once(&mut stream).is_pending());

        h.respond(ResponseMessage {
            stream_id: Some(stream.stream_id().clone()),
            stream_event: Some(StreamEvent::Next),
            data: None,
        });
        assert!(matches!(poll_once(&mut stream), Poll::Ready(Some(Ok(Value::Null)))));
    }

    #[test]
    fn test_cancel_ends_immediately_and_sends_abort_once() {
        let h = harness();
        let token = CancellationToken::new();
        let mut stream = h.caller.invoke("ticker", vec![], Some(token.clone()));
        assert!(poll_once(&mut stream).is_pending());
        let id = stream.stream_id().clone();

        h.respond(ResponseMessage::next(id.clone(), json!(1)));
        token.cancel();

        // Queued values are discarded once cancelled.
        assert!(matches!(poll_once(&mut stream), Poll::Ready(None)));
        assert!(matches!(poll_once(&mut stream), Poll::Ready(None)));
        drop(stream);

        let aborts: Vec<_> = h
            .sent()
            .into_iter()
            .filter(|r| matches!(r, RequestMessage::Abort { .. }))
            .collect();
        assert_eq!(aborts, vec![RequestMessage::abort(id)]);
        assert_eq!(h.caller.api().listener_count(), 0);
    }

    #[test]
    fn test_cancel_wakes_pending_call_without_runtime() {
        let h = harness();
        let token = CancellationToken::new();
        let mut stream = h.caller.invoke("ticker", vec![], Some(token.clone()));
        let id = stream.stream_id().clone();

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            token.cancel();
        });
        let end = futures::executor::block_on(stream.next());
        canceller.join().unwrap();

        assert!(end.is_none());
        assert_eq!(h.sent().last(), Some(&RequestMessage::abort(id)));
        assert_eq!(h.caller.api().listener_count(), 0);
    }

    #[test]
    fn test_cancelled_before_start_sends_nothing() {
        let h = harness();
        let token = CancellationToken::new();
        token.cancel();
        let mut stream = h.caller.invoke("ticker", vec![], Some(token));

        assert!(matches!(poll_once(&mut stream), Poll::Ready(None)));
        assert!(h.sent().is_empty());
        assert_eq!(h.caller.api().listener_count(), 0);
    }

    #[test]
    fn test_drop_mid_call_sends_abort() {
        let h = harness();
        let mut stream = h.caller.invoke("ticker", vec![], None);
        assert!(poll_once(&mut stream).is_pending());
        let id = stream.stream_id().clone();

        drop(stream);

        assert_eq!(h.sent().last(), Some(&RequestMessage::abort(id)));
        assert_eq!(h.caller.api().listener_count(), 0);
    }

    #[test]
    fn test_drop_after_complete_sends_no_abort() {
        let h = harness();
        let mut stream = h.caller.invoke("echo", vec![], None);
        assert!(poll_once(&mut stream).is_pending());
        h.respond(ResponseMessage::complete(stream.stream_id().clone()));
        assert!(matches!(poll_once(&mut stream), Poll::Ready(None)));

        drop(stream);

        assert_eq!(h.sent().len(), 1);
    }

    #[test]
    fn test_each_invoke_uses_new_stream_id() {
        let h = harness();
        let a = h.caller.invoke("echo", vec![], None);
        let b = h.caller.invoke("echo", vec![], None);
        assert_ne!(a.stream_id(), b.stream_id());
    }

    #[test]
    fn test_proxy_binds_method() {
        let h = harness();
        let proxy = h.caller.proxy("chat/models");
        assert_eq!(proxy.method(), "chat/models");

        let mut stream = proxy.call(vec![json!("x")], None);
        assert!(poll_once(&mut stream).is_pending());
        assert!(matches!(
            &h.sent()[0],
            RequestMessage::Call { method, .. } if method == "chat/models"
        ));
    }

    #[tokio::test]
    async fn test_typed_values() {
        let h = harness();
        let mut stream = Box::pin(h.caller.invoke("nums", vec![], None).typed::<u32>());

        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(stream.as_mut().poll_next(&mut cx).is_pending());
        let id = match &h.sent()[0] {
            RequestMessage::Call { stream_id: Some(id), .. } => id.clone(),
            other => panic!("unexpected {:?}", other),
        };

        h.respond(ResponseMessage::next(id.clone(), json!(7)));
        h.respond(ResponseMessage::next(id.clone(), json!("seven")));
        h.respond(ResponseMessage::complete(id));

        assert_eq!(stream.next().await.unwrap().unwrap(), 7);
        assert!(matches!(stream.next().await, Some(Err(RpcError::Json(_)))));
        assert!(stream.next().await.is_none());
    }
}
