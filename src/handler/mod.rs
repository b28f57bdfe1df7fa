//! Handler module - the server's named method table.
//!
//! Provides [`MethodRegistry`], mapping method names to async handlers.
//! Handlers receive the request's positional arguments and return a JSON
//! value or an error; responding on the wire is the server's concern.
//!
//! # Example
//!
//! ```
//! use sockwire::handler::MethodRegistry;
//! use serde_json::{json, Value};
//!
//! let mut registry = MethodRegistry::new();
//!
//! registry.register("add", |args: Vec<Value>| async move {
//!     let a = args[0].as_i64().unwrap_or(0);
//!     let b = args[1].as_i64().unwrap_or(0);
//!     Ok(json!(a + b))
//! });
//!
//! assert_eq!(registry.names(), vec!["add"]);
//! ```

mod registry;

pub use registry::{BoxFuture, Method, MethodRegistry, MethodResult};
