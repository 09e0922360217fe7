//! Method implementations.

use std::marker::PhantomData;

use futures::stream::{BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Lazy sequence of values produced by one call.
pub type ValueStream = BoxStream<'static, Result<Value>>;

/// A remotely callable method.
///
/// Invoked fresh for every call with the call's arguments and a token that
/// is cancelled when the caller aborts. Implementations may ignore the
/// token; the responder stops pulling from the stream once it fires.
/// Returning `Err(RpcError::Aborted)` from the stream is reported to the
/// caller as normal completion.
pub trait Method: Send + Sync + 'static {
    /// Start a call.
    ///
    /// # Errors
    ///
    /// Returns error if the arguments cannot be accepted.
    fn call(&self, args: Vec<Value>, cancel: CancellationToken) -> Result<ValueStream>;
}

/// Method over the raw argument list.
pub struct RawMethod<F> {
    handler: F,
}

impl<F> RawMethod<F> {
    /// Wrap a handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, S> Method for RawMethod<F>
where
    F: Fn(Vec<Value>, CancellationToken) -> S + Send + Sync + 'static,
    S: Stream<Item = Result<Value>> + Send + 'static,
{
    fn call(&self, args: Vec<Value>, cancel: CancellationToken) -> Result<ValueStream> {
        Ok((self.handler)(args, cancel).boxed())
    }
}

/// Method that deserializes its arguments into `A` and serializes each
/// produced `T`.
pub struct TypedMethod<F, A, S, T> {
    handler: F,
    _phantom: PhantomData<fn(A) -> (S, T)>,
}

impl<F, A, S, T> TypedMethod<F, A, S, T> {
    /// Wrap a handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, A, S, T> Method for TypedMethod<F, A, S, T>
where
    F: Fn(A, CancellationToken) -> S + Send + Sync + 'static,
    A: DeserializeOwned + 'static,
    S: Stream<Item = Result<T>> + Send + 'static,
    T: Serialize + 'static,
{
    fn call(&self, args: Vec<Value>, cancel: CancellationToken) -> Result<ValueStream> {
        let parsed: A = decode_args(args)?;

        let stream = (self.handler)(parsed, cancel)
            .map(|item| item.and_then(|value| Ok(serde_json::to_value(value)?)));
        Ok(stream.boxed())
    }
}

/// Deserialize a positional argument list.
///
/// The list is read as a JSON array, so tuples, `Vec`s and tuple structs
/// work. An empty list also accepts types that deserialize from `null`
/// (`()`, `Option<_>`), for methods taking no arguments.
///
/// # Errors
///
/// Returns error if the arguments do not match `A`.
pub fn decode_args<A: DeserializeOwned>(args: Vec<Value>) -> Result<A> {
    let empty = args.is_empty();
    match serde_json::from_value(Value::Array(args)) {
        Ok(parsed) => Ok(parsed),
        Err(_) if empty => Ok(serde_json::from_value(Value::Null)?),
        Err(e) => Err(e.into()),
    }
}
