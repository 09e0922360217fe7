//! Method registry for dispatching calls by name.
//!
//! Names are validated when a method is registered, so an unknown name at
//! call time can only mean the caller asked for something that was never
//! offered. Each method is also assigned a [`MethodId`], sequentially from 1
//! (0 is reserved).
//!
//! The registry holds no per-call state; every call gets a fresh stream
//! from the implementation.

use std::collections::HashMap;
use std::fmt;

use futures::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{Method, RawMethod, TypedMethod, ValueStream};
use crate::error::{Result, RpcError};

/// Identifier assigned to a registered method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u16);

impl MethodId {
    /// Numeric value.
    #[inline]
    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct MethodEntry {
    id: MethodId,
    method: Box<dyn Method>,
}

/// Registry mapping method names to implementations.
pub struct MethodRegistry {
    methods: HashMap<String, MethodEntry>,
    next_id: u16,
}

impl MethodRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
            next_id: 1, // 0 is reserved
        }
    }

    /// Register a method whose arguments deserialize into `A` and whose
    /// stream yields serializable `T`.
    pub fn register<F, A, S, T>(&mut self, name: &str, handler: F) -> Result<MethodId>
    where
        F: Fn(A, CancellationToken) -> S + Send + Sync + 'static,
        A: DeserializeOwned + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
        T: Serialize + 'static,
    {
        self.register_method(name, TypedMethod::new(handler))
    }

    /// Register a method over the raw argument list.
    pub fn register_raw<F, S>(&mut self, name: &str, handler: F) -> Result<MethodId>
    where
        F: Fn(Vec<Value>, CancellationToken) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Value>> + Send + 'static,
    {
        self.register_method(name, RawMethod::new(handler))
    }

    /// Register any [`Method`] implementation.
    ///
    /// # Errors
    ///
    /// - `InvalidMethodName` if the name is empty or contains whitespace or
    ///   control characters
    /// - `DuplicateMethod` if the name is taken
    pub fn register_method(&mut self, name: &str, method: impl Method) -> Result<MethodId> {
        validate_name(name)?;
        if self.methods.contains_key(name) {
            return Err(RpcError::DuplicateMethod(name.to_string()));
        }
        if self.next_id == u16::MAX {
            return Err(RpcError::Protocol("method id space exhausted".into()));
        }

        let id = MethodId(self.next_id);
        self.next_id += 1;

        self.methods.insert(
            name.to_string(),
            MethodEntry {
                id,
                method: Box::new(method),
            },
        );
        Ok(id)
    }

    /// Get a method by name.
    pub fn get(&self, name: &str) -> Option<&dyn Method> {
        self.methods.get(name).map(|e| e.method.as_ref())
    }

    /// Id assigned to `name`.
    pub fn method_id(&self, name: &str) -> Option<MethodId> {
        self.methods.get(name).map(|e| e.id)
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Start a call to `name`.
    ///
    /// # Errors
    ///
    /// - `InvalidMethod` if nothing is registered under `name`
    /// - `InvalidArguments` if the implementation rejects `args`
    pub fn invoke(
        &self,
        name: &str,
        args: Vec<Value>,
        cancel: CancellationToken,
    ) -> Result<ValueStream> {
        let method = self
            .get(name)
            .ok_or_else(|| RpcError::InvalidMethod(name.to_string()))?;

        method
            .call(args, cancel)
            .map_err(|e| RpcError::InvalidArguments {
                method: name.to_string(),
                reason: e.to_string(),
            })
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.names())
            .finish()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RpcError::InvalidMethodName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};
    use serde_json::json;

    fn echo(args: Vec<Value>, _cancel: CancellationToken) -> impl Stream<Item = Result<Value>> {
        stream::iter(args.into_iter().map(Ok))
    }

    #[test]
    fn test_register_method() {
        let mut registry = MethodRegistry::new();

        let id = registry.register_raw("echo", echo).unwrap();

        assert!(registry.get("echo").is_some());
        assert_eq!(registry.method_id("echo"), Some(id));
        assert_eq!(registry.method_id("other"), None);
    }

    #[test]
    fn test_id_assignment_sequential() {
        let mut registry = MethodRegistry::new();

        registry.register_raw("method1", echo).unwrap();
        registry.register_raw("method2", echo).unwrap();
        registry.register_raw("method3", echo).unwrap();

        assert_eq!(registry.method_id("method1").map(MethodId::get), Some(1));
        assert_eq!(registry.method_id("method2").map(MethodId::get), Some(2));
        assert_eq!(registry.method_id("method3").map(MethodId::get), Some(3));
        assert_eq!(registry.names(), vec!["method1", "method2", "method3"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let mut registry = MethodRegistry::new();
        registry.register_raw("echo", echo).unwrap();

        assert!(matches!(
            registry.register_raw("echo", echo),
            Err(RpcError::DuplicateMethod(name)) if name == "echo"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let mut registry = MethodRegistry::new();
        for bad in ["", "has space", "tab\there", "nl\n"] {
            assert!(matches!(
                registry.register_raw(bad, echo),
                Err(RpcError::InvalidMethodName(_))
            ));
        }
        assert!(registry.is_empty());
        assert!(registry.register_raw("chat/submit", echo).is_ok());
    }

    #[test]
    fn test_handler_not_found() {
        let registry = MethodRegistry::new();

        assert!(registry.get("nonexistent").is_none());
        assert!(matches!(
            registry.invoke("nonexistent", vec![], CancellationToken::new()),
            Err(RpcError::InvalidMethod(name)) if name == "nonexistent"
        ));
    }

    #[test]
    fn test_invoke_bad_arguments() {
        let mut registry = MethodRegistry::new();
        registry
            .register("count", |(n,): (u32,), _cancel| {
                stream::iter((0..n).map(Ok::<_, RpcError>))
            })
            .unwrap();

        assert!(matches!(
            registry.invoke("count", vec![json!("three")], CancellationToken::new()),
            Err(RpcError::InvalidArguments { method, .. }) if method == "count"
        ));
    }

    #[tokio::test]
    async fn test_invoke_is_fresh_per_call() {
        let mut registry = MethodRegistry::new();
        registry
            .register("count", |(n,): (u32,), _cancel| {
                stream::iter((0..n).map(Ok::<_, RpcError>))
            })
            .unwrap();

        for _ in 0..2 {
            let values: Vec<Value> = registry
                .invoke("count", vec![json!(3)], CancellationToken::new())
                .unwrap()
                .map(|r| r.unwrap())
                .collect()
                .await;
            assert_eq!(values, vec![json!(0), json!(1), json!(2)]);
        }
    }
}
