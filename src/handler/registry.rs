//! Method registry for dispatching requests by name.
//!
//! The registry is built before the server starts and is read-only
//! afterwards; the server shares it behind an `Arc` with no locking.
//! Registering the same name twice replaces the earlier handler. Reserved
//! names (`__ping`, `__methods`) are answered by the server before the
//! registry is consulted, so a handler under a reserved name is never
//! reachable.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::{Result, SockwireError};

/// Result type for method handlers.
pub type MethodResult = Result<Value>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for callable methods.
pub trait Method: Send + Sync + 'static {
    /// Invoke the method with the request's argument sequence.
    fn call(&self, args: Vec<Value>) -> BoxFuture<'static, MethodResult>;
}

/// Wrapper turning an async closure into a [`Method`].
struct FnMethod<F>(F);

impl<F, Fut> Method for FnMethod<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MethodResult> + Send + 'static,
{
    fn call(&self, args: Vec<Value>) -> BoxFuture<'static, MethodResult> {
        Box::pin((self.0)(args))
    }
}

/// Registry mapping method names to handlers.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Box<dyn Method>>,
}

impl MethodRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method handler.
    ///
    /// The handler receives the request's positional arguments and
    /// produces the return value, or an error that the server converts
    /// into a failure response.
    pub fn register<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        self.methods
            .insert(name.to_string(), Box::new(FnMethod(handler)));
    }

    /// Get a handler by name.
    pub fn get(&self, name: &str) -> Option<&dyn Method> {
        self.methods.get(name).map(|m| m.as_ref())
    }

    /// Whether a method is registered under this name.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Sorted list of registered method names.
    ///
    /// This is what `__methods` publishes to callers.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the registry has no methods.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Dispatch a request to the named handler.
    ///
    /// # Errors
    ///
    /// `MethodNotFound` if no handler is registered under `name`; otherwise
    /// whatever the handler itself returns.
    pub async fn dispatch(&self, name: &str, args: Vec<Value>) -> MethodResult {
        let method = self
            .get(name)
            .ok_or_else(|| SockwireError::MethodNotFound(name.to_string()))?;

        method.call(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sum_registry() -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        registry.register("add", |args: Vec<Value>| async move {
            let a = args.first().and_then(Value::as_i64).unwrap_or(0);
            let b = args.get(1).and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(a + b))
        });
        registry
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = sum_registry();

        assert!(registry.get("add").is_some());
        assert!(registry.contains("add"));
        assert!(!registry.contains("sub"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = MethodRegistry::new();
        registry.register("sub", |_args| async { Ok(Value::Null) });
        registry.register("add", |_args| async { Ok(Value::Null) });
        registry.register("mul", |_args| async { Ok(Value::Null) });

        assert_eq!(registry.names(), vec!["add", "mul", "sub"]);
    }

    #[test]
    fn test_duplicate_registration_replaces() {
        let mut registry = MethodRegistry::new();
        registry.register("answer", |_args| async { Ok(json!(1)) });
        registry.register("answer", |_args| async { Ok(json!(2)) });

        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_invokes_handler() {
        let registry = sum_registry();

        let result = registry.dispatch("add", vec![json!(2), json!(3)]).await;
        assert_eq!(result.unwrap(), json!(5));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        let registry = sum_registry();

        let result = registry.dispatch("mul", vec![]).await;
        assert!(matches!(result, Err(SockwireError::MethodNotFound(name)) if name == "mul"));
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let mut registry = MethodRegistry::new();
        registry.register("boom", |_args| async {
            Err(SockwireError::Protocol("deliberate".to_string()))
        });

        let result = registry.dispatch("boom", vec![]).await;
        assert!(matches!(result, Err(SockwireError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_handler_sees_args_in_order() {
        let mut registry = MethodRegistry::new();
        registry.register("echo_args", |args: Vec<Value>| async move { Ok(json!(args)) });

        let result = registry
            .dispatch("echo_args", vec![json!("a"), json!(1), json!(null)])
            .await
            .unwrap();
        assert_eq!(result, json!(["a", 1, null]));
    }
}
