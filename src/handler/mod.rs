//! Handler module - method implementations and their registry.
//!
//! Provides:
//! - [`Method`] - a callable producing a lazy, cancelable value stream
//! - [`MethodRegistry`] - maps validated method names to implementations
//!
//! # Example
//!
//! ```
//! use futures::stream;
//! use panelwire::handler::MethodRegistry;
//! use serde_json::Value;
//!
//! let mut registry = MethodRegistry::new();
//!
//! // Typed arguments are deserialized from the `args` array.
//! registry
//!     .register("repeat", |(word, times): (String, usize), _cancel| {
//!         stream::iter((0..times).map(move |_| Ok(word.clone())))
//!     })
//!     .unwrap();
//!
//! // Raw methods see the argument list as-is.
//! registry
//!     .register_raw("echo", |args: Vec<Value>, _cancel| stream::iter(args.into_iter().map(Ok)))
//!     .unwrap();
//!
//! assert!(registry.contains("repeat"));
//! ```

mod method;
mod registry;

pub use method::{decode_args, Method, RawMethod, TypedMethod, ValueStream};
pub use registry::{MethodId, MethodRegistry};
