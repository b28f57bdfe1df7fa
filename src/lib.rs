//! # sockwire
//!
//! Bidirectional RPC over TCP and Unix domain sockets.
//!
//! Frames are length-prefixed UTF-8 JSON; a server exposes a named method
//! table, and a client discovers it dynamically, multiplexes correlated
//! calls over one connection, enforces per-call timeouts, and can keep the
//! session alive with a heartbeat and automatic reconnection.
//!
//! ## Architecture
//!
//! - **protocol**: 4-byte big-endian length framing, stream reassembly,
//!   request/response envelopes
//! - **transport**: one abstraction over TCP and Unix sockets
//! - **server**: accept loop, per-connection dispatch, stale-socket reclaim
//! - **client**: discovery, pending-call table, timeout races, heartbeat
//!
//! ## Example
//!
//! ```no_run
//! use sockwire::{Client, Endpoint, Server};
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> sockwire::Result<()> {
//!     let server = Server::builder()
//!         .method("add", |args: Vec<Value>| async move {
//!             let a = args[0].as_i64().unwrap_or(0);
//!             let b = args[1].as_i64().unwrap_or(0);
//!             Ok(json!(a + b))
//!         })
//!         .listen(Endpoint::tcp(([127, 0, 0, 1], 4600)))
//!         .await?;
//!
//!     let client = Client::builder()
//!         .connect(Endpoint::tcp(([127, 0, 0, 1], 4600)))
//!         .await?;
//!
//!     let sum = client.call("add", vec![json!(2), json!(3)]).await?;
//!     assert_eq!(sum, json!(5));
//!
//!     drop(server);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod handler;
pub mod protocol;
pub mod transport;

mod client;
mod error;
mod server;
mod writer;

pub use client::{Client, ClientBuilder, ClientEvent};
pub use error::{Result, SockwireError};
pub use server::{Server, ServerBuilder, ServerHandle};
pub use transport::Endpoint;
