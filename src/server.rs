//! RPC server: binds an endpoint, accepts connections, dispatches requests.
//!
//! The [`ServerBuilder`] collects the method table and policy flags; calling
//! `listen` binds the endpoint and starts the accept loop. Each connection
//! runs its own read loop and writer task; each request is dispatched on its
//! own task so a slow method never blocks the connection.
//!
//! # Example
//!
//! ```no_run
//! use sockwire::{Endpoint, Server};
//! use serde_json::{json, Value};
//!
//! # async fn example() -> sockwire::Result<()> {
//! let server = Server::builder()
//!     .method("add", |args: Vec<Value>| async move {
//!         let a = args[0].as_i64().unwrap_or(0);
//!         let b = args[1].as_i64().unwrap_or(0);
//!         Ok(json!(a + b))
//!     })
//!     .listen(Endpoint::unix("/tmp/calc.sock"))
//!     .await?;
//! # drop(server);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::io::ErrorKind;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::{Result, SockwireError};
use crate::handler::{MethodRegistry, MethodResult};
use crate::protocol::{
    recover_request_id, FrameBuffer, Request, Response, DEFAULT_MAX_FRAME_SIZE, METHODS_METHOD,
    PING_METHOD,
};
use crate::transport::{Endpoint, Listener, Stream};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Entry point for building a server. See [`ServerBuilder`].
pub struct Server;

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }
}

/// Builder for configuring and starting a server.
pub struct ServerBuilder {
    registry: MethodRegistry,
    autoclear: bool,
    expose: bool,
    max_frame_size: usize,
    writer_config: WriterConfig,
}

impl ServerBuilder {
    /// Create a new builder with default policy (autoclear on, expose off).
    pub fn new() -> Self {
        Self {
            registry: MethodRegistry::new(),
            autoclear: true,
            expose: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            writer_config: WriterConfig::default(),
        }
    }

    /// Register a method handler.
    ///
    /// Handlers receive the request's positional arguments; their return
    /// value is wrapped in a success response, their error in a failure
    /// response. The reserved names (`__ping`, `__methods`) are answered
    /// before the table is consulted and cannot be overridden.
    pub fn method<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        self.registry.register(name, handler);
        self
    }

    /// Whether to reclaim a stale Unix socket artifact before binding.
    ///
    /// Default: true.
    pub fn autoclear(mut self, autoclear: bool) -> Self {
        self.autoclear = autoclear;
        self
    }

    /// Whether failure responses carry the internal error detail.
    ///
    /// When disabled (the default), callers see `data: null` on failure so
    /// internals never leak to untrusted peers.
    pub fn expose(mut self, expose: bool) -> Self {
        self.expose = expose;
        self
    }

    /// Maximum payload size accepted from a peer. Default: 64 MiB.
    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Bind the endpoint and start accepting connections.
    ///
    /// Resolves once the endpoint is actively accepting. For a Unix
    /// endpoint with `autoclear` enabled and an existing socket file, a
    /// liveness probe runs first: a peer that accepts the probe owns the
    /// endpoint (`SocketInUse`); a refused connection marks the artifact
    /// stale and it is removed before binding; any other probe outcome is
    /// `SocketUnavailable`. Bind-time failures are never retried.
    pub async fn listen(self, endpoint: impl Into<Endpoint>) -> Result<ServerHandle> {
        let endpoint = endpoint.into();

        if let Endpoint::Unix(path) = &endpoint {
            if self.autoclear && path.exists() {
                reclaim_stale_socket(&endpoint).await?;
            }
        }

        let listener = Listener::bind(&endpoint).await?;
        let local = listener.local_endpoint()?;

        let shared = Arc::new(Shared {
            registry: self.registry,
            expose: self.expose,
            max_frame_size: self.max_frame_size,
            writer_config: self.writer_config,
        });

        let accept_task = tokio::spawn(accept_loop(listener, shared));

        Ok(ServerHandle { local, accept_task })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running server.
///
/// Dropping the handle stops the accept loop, closes every live
/// connection, and (for Unix endpoints) unlinks the socket file.
pub struct ServerHandle {
    local: Endpoint,
    accept_task: JoinHandle<()>,
}

impl ServerHandle {
    /// The endpoint actually bound. For TCP this carries the OS-assigned
    /// port when binding to port 0.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    /// Stop accepting and tear down all live connections.
    pub fn shutdown(self) {
        self.accept_task.abort();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Server state shared across connections. The method table is read-only
/// from here on; no locking needed.
struct Shared {
    registry: MethodRegistry,
    expose: bool,
    max_frame_size: usize,
    writer_config: WriterConfig,
}

/// Probe an existing Unix socket file to decide whether it is stale.
async fn reclaim_stale_socket(endpoint: &Endpoint) -> Result<()> {
    let path = endpoint.path().expect("unix endpoint has a path");

    match Stream::connect(endpoint).await {
        Ok(stream) => {
            // A live peer answered; the endpoint is owned.
            drop(stream);
            Err(SockwireError::SocketInUse)
        }
        Err(SockwireError::Io(e)) if e.kind() == ErrorKind::ConnectionRefused => {
            tracing::debug!(path = %path.display(), "removing stale socket file");
            std::fs::remove_file(path)?;
            Ok(())
        }
        Err(_) => Err(SockwireError::SocketUnavailable),
    }
}

/// Accept connections until the handle is dropped.
///
/// Connection tasks live in a `JoinSet`, so aborting this loop tears all
/// of them down with it.
async fn accept_loop(listener: Listener, shared: Arc<Shared>) {
    let mut conns = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    conns.spawn(handle_connection(stream, shared.clone()));
                }
                Err(e) => {
                    tracing::warn!("accept failed: {}", e);
                }
            },
            Some(_) = conns.join_next(), if !conns.is_empty() => {}
        }
    }
}

/// Aborts the wrapped task when dropped, so a cancelled connection takes
/// its writer (and the socket's write half) down with it.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Per-connection read loop: reassemble frames, dispatch each request on
/// its own task.
async fn handle_connection(stream: Stream, shared: Arc<Shared>) {
    let (mut reader, write_half) = stream.into_split();
    let (writer, writer_task) = spawn_writer_task(write_half, shared.writer_config.clone());
    let _writer_guard = AbortOnDrop(writer_task);

    let mut buffer = FrameBuffer::with_max_frame_size(shared.max_frame_size);
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("connection read failed: {}", e);
                break;
            }
        };

        let payloads = match buffer.push(&buf[..n]) {
            Ok(p) => p,
            Err(e) => {
                // No way to re-synchronize past a hostile length prefix.
                tracing::warn!("framing violation, closing connection: {}", e);
                break;
            }
        };

        for payload in payloads {
            let shared = shared.clone();
            let writer = writer.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_frame(&payload, &shared, &writer).await {
                    tracing::debug!("response not delivered: {}", e);
                }
            });
        }
    }
}

/// Parse one frame as a request, dispatch it, and send the response.
async fn handle_frame(payload: &Bytes, shared: &Shared, writer: &WriterHandle) -> Result<()> {
    let (id, outcome) = match Request::from_slice(payload) {
        Ok(req) => {
            let result = match req.name.as_str() {
                PING_METHOD => Ok(Value::Bool(true)),
                METHODS_METHOD => Ok(json!(shared.registry.names())),
                _ => shared.registry.dispatch(&req.name, req.args).await,
            };
            (req.id, result)
        }
        Err(err) => match recover_request_id(payload) {
            Some(id) => (id, Err(err)),
            None => {
                // No id means no one to respond to.
                tracing::warn!("dropping malformed frame without recoverable id");
                return Ok(());
            }
        },
    };

    let response = match outcome {
        Ok(data) => Response::ok(id, data),
        Err(err) => {
            tracing::debug!(id, "call failed: {}", err);
            let data = if shared.expose {
                Value::String(err.to_string())
            } else {
                Value::Null
            };
            Response::fail(id, data)
        }
    };

    writer
        .send(OutboundFrame::new(Bytes::from(response.encode()?)))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::write_frame;
    use tokio::io::AsyncWriteExt;

    async fn call_raw(endpoint: &Endpoint, raw: &[u8]) -> Response {
        let mut stream = Stream::connect(endpoint).await.unwrap();
        write_frame(&mut stream, raw).await.unwrap();

        let mut buffer = FrameBuffer::new();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = AsyncReadExt::read(&mut stream, &mut buf).await.unwrap();
            assert_ne!(n, 0, "connection closed without a response");
            let mut payloads = buffer.push(&buf[..n]).unwrap();
            if let Some(payload) = payloads.pop() {
                return Response::from_slice(&payload).unwrap();
            }
        }
    }

    async fn spawn_add_server() -> ServerHandle {
        Server::builder()
            .method("add", |args: Vec<Value>| async move {
                let a = args.first().and_then(Value::as_i64).unwrap_or(0);
                let b = args.get(1).and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(a + b))
            })
            .listen(Endpoint::tcp(([127, 0, 0, 1], 0)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_registered_method() {
        let server = spawn_add_server().await;
        let req = Request::new(1, "add", vec![json!(2), json!(3)]);

        let res = call_raw(server.local_endpoint(), &req.encode().unwrap()).await;

        assert!(res.success);
        assert_eq!(res.id, 1);
        assert_eq!(res.data, json!(5));
    }

    #[tokio::test]
    async fn test_reserved_ping() {
        let server = spawn_add_server().await;
        let req = Request::new(9, PING_METHOD, vec![]);

        let res = call_raw(server.local_endpoint(), &req.encode().unwrap()).await;

        assert!(res.success);
        assert_eq!(res.data, json!(true));
    }

    #[tokio::test]
    async fn test_reserved_methods_lists_table() {
        let server = spawn_add_server().await;
        let req = Request::new(2, METHODS_METHOD, vec![]);

        let res = call_raw(server.local_endpoint(), &req.encode().unwrap()).await;

        assert!(res.success);
        assert_eq!(res.data, json!(["add"]));
    }

    #[tokio::test]
    async fn test_unknown_method_fails_without_detail() {
        let server = spawn_add_server().await;
        let req = Request::new(3, "mul", vec![json!(2), json!(3)]);

        let res = call_raw(server.local_endpoint(), &req.encode().unwrap()).await;

        assert!(!res.success);
        assert_eq!(res.data, Value::Null);
    }

    #[tokio::test]
    async fn test_expose_returns_error_detail() {
        let server = Server::builder()
            .expose(true)
            .listen(Endpoint::tcp(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let req = Request::new(4, "mul", vec![]);

        let res = call_raw(server.local_endpoint(), &req.encode().unwrap()).await;

        assert!(!res.success);
        assert!(res.data.as_str().unwrap().contains("invalid-method"));
    }

    #[tokio::test]
    async fn test_malformed_request_with_recoverable_id() {
        let server = spawn_add_server().await;
        // args is not an array -> invalid-request, but the id is usable
        let raw = serde_json::to_vec(&json!({"id": 77, "name": "add", "args": 5})).unwrap();

        let res = call_raw(server.local_endpoint(), &raw).await;

        assert_eq!(res.id, 77);
        assert!(!res.success);
    }

    #[tokio::test]
    async fn test_malformed_frame_without_id_is_dropped() {
        let server = spawn_add_server().await;
        let endpoint = server.local_endpoint().clone();

        let mut stream = Stream::connect(&endpoint).await.unwrap();
        write_frame(&mut stream, b"{\"noise\": true}").await.unwrap();

        // The connection stays usable: a valid request still gets answered.
        let req = Request::new(5, "add", vec![json!(1), json!(1)]);
        write_frame(&mut stream, &req.encode().unwrap()).await.unwrap();

        let mut buffer = FrameBuffer::new();
        let mut buf = vec![0u8; 4096];
        let res = loop {
            let n = AsyncReadExt::read(&mut stream, &mut buf).await.unwrap();
            assert_ne!(n, 0);
            let mut payloads = buffer.push(&buf[..n]).unwrap();
            if let Some(payload) = payloads.pop() {
                break Response::from_slice(&payload).unwrap();
            }
        };

        assert_eq!(res.id, 5);
        assert_eq!(res.data, json!(2));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failure_response() {
        let server = Server::builder()
            .method("boom", |_args| async {
                Err(SockwireError::Protocol("deliberate".to_string()))
            })
            .listen(Endpoint::tcp(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let req = Request::new(6, "boom", vec![]);

        let res = call_raw(server.local_endpoint(), &req.encode().unwrap()).await;

        assert!(!res.success);
        assert_eq!(res.data, Value::Null);
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let server = spawn_add_server().await;
        let endpoint = server.local_endpoint().clone();

        let mut stream = Stream::connect(&endpoint).await.unwrap();
        server.shutdown();

        // Reads on the dead connection end with EOF or a reset.
        let mut buf = vec![0u8; 16];
        let deadline = tokio::time::Duration::from_secs(2);
        let result = tokio::time::timeout(deadline, async {
            loop {
                match AsyncReadExt::read(&mut stream, &mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        assert!(result.is_ok(), "connection not torn down after shutdown");

        let _ = stream.shutdown().await;
    }
}
