//! RPC client: outbound connection, method discovery, correlated calls.
//!
//! `connect` opens the transport and issues a reserved `__methods` call;
//! the discovered names become the client's callable surface. Every call
//! gets a fresh correlation id from a strictly increasing per-client
//! counter and races three terminal events: the matching response, a
//! transport failure, or the per-call timeout. Exactly one of them settles
//! the call.
//!
//! With a positive ping interval the client runs a heartbeat loop; with
//! `reconnect` enabled a failed heartbeat tears the session down and
//! re-establishes it (including rediscovery), retrying indefinitely at the
//! same cadence while the server stays unreachable.
//!
//! # Example
//!
//! ```no_run
//! use sockwire::{Client, Endpoint};
//! use serde_json::json;
//!
//! # async fn example() -> sockwire::Result<()> {
//! let client = Client::builder()
//!     .reconnect(true)
//!     .connect(Endpoint::unix("/tmp/calc.sock"))
//!     .await?;
//!
//! let sum = client.call("add", vec![json!(2), json!(3)]).await?;
//! assert_eq!(sum, json!(5));
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, SockwireError};
use crate::protocol::{
    FrameBuffer, Request, Response, DEFAULT_MAX_FRAME_SIZE, METHODS_METHOD, PING_METHOD,
};
use crate::transport::{Endpoint, Stream};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Smallest accepted per-call timeout.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Default heartbeat interval.
pub const DEFAULT_PING: Duration = Duration::from_secs(10);

/// Smallest accepted heartbeat interval (zero still disables).
pub const MIN_PING: Duration = Duration::from_secs(5);

/// Connection-health events republished to observers.
///
/// Observation is independent of the client's internal correlation logic;
/// a lagging or absent subscriber changes nothing about call handling.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Transport open and method discovery complete.
    Connected,
    /// The connection is gone and no reconnect is in progress.
    Disconnected,
    /// A reconnect attempt is starting.
    Reconnecting,
    /// A transport or reconnect error, carried as display text.
    Error(String),
}

/// Builder for configuring and connecting a client.
pub struct ClientBuilder {
    timeout: Duration,
    ping: Duration,
    reconnect: bool,
    max_frame_size: usize,
    writer_config: WriterConfig,
}

impl ClientBuilder {
    /// Create a builder with defaults (10 s timeout, 10 s ping, no
    /// reconnect).
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            ping: DEFAULT_PING,
            reconnect: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            writer_config: WriterConfig::default(),
        }
    }

    /// Per-call timeout. Values below 100 ms are raised to the floor.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(MIN_TIMEOUT);
        self
    }

    /// Heartbeat interval. Zero disables the heartbeat; any other value
    /// below 5 s is raised to the floor.
    pub fn ping(mut self, interval: Duration) -> Self {
        self.ping = if interval.is_zero() {
            Duration::ZERO
        } else {
            interval.max(MIN_PING)
        };
        self
    }

    /// Whether a failed heartbeat triggers automatic reconnection.
    /// Default: false.
    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Maximum payload size accepted from the peer. Default: 64 MiB.
    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Open the transport, discover methods, and start the heartbeat.
    ///
    /// Discovery failure fails the connect and tears the transport back
    /// down; with `reconnect` disabled there is nothing left running.
    pub async fn connect(self, endpoint: impl Into<Endpoint>) -> Result<Client> {
        let (events, _) = broadcast::channel(64);

        let shared = Arc::new(Shared {
            endpoint: endpoint.into(),
            timeout: self.timeout,
            ping: self.ping,
            reconnect: self.reconnect,
            max_frame_size: self.max_frame_size,
            writer_config: self.writer_config,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            methods: Mutex::new(Vec::new()),
            conn: tokio::sync::Mutex::new(None),
            heartbeat: Mutex::new(None),
            events,
        });

        open(&shared).await?;

        if !shared.ping.is_zero() {
            let task = tokio::spawn(heartbeat(shared.clone()));
            *shared.heartbeat.lock().unwrap() = Some(task);
        }

        Ok(Client { shared })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected RPC client.
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Invoke a discovered method.
    ///
    /// The name must be on the surface reported by the server's
    /// `__methods` during the current session; anything else fails with
    /// `MethodNotFound` without touching the wire.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        if !self.shared.methods.lock().unwrap().iter().any(|m| m == name) {
            return Err(SockwireError::MethodNotFound(name.to_string()));
        }

        raw_call(&self.shared, name, args).await
    }

    /// Invoke a discovered method and deserialize its return value.
    ///
    /// Deployments are expected to pin their contract with a thin typed
    /// wrapper over this instead of passing raw names around; discovery
    /// stays available for introspection via [`methods`](Self::methods).
    pub async fn call_as<T: serde::de::DeserializeOwned>(
        &self,
        name: &str,
        args: Vec<Value>,
    ) -> Result<T> {
        let value = self.call(name, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Probe server liveness with the reserved `__ping` method.
    pub async fn ping(&self) -> Result<()> {
        raw_call(&self.shared, PING_METHOD, Vec::new()).await?;
        Ok(())
    }

    /// The method names discovered in the current session.
    pub fn methods(&self) -> Vec<String> {
        self.shared.methods.lock().unwrap().clone()
    }

    /// Subscribe to connection-health events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Tear down the current session and establish a fresh one, including
    /// method rediscovery. Pending calls on the old connection fail with
    /// `ConnectionClosed`.
    pub async fn reconnect(&self) -> Result<()> {
        emit(&self.shared, ClientEvent::Reconnecting);

        match open(&self.shared).await {
            Ok(()) => Ok(()),
            Err(e) => {
                emit(&self.shared, ClientEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Stop the heartbeat, close the connection, and fail pending calls.
    pub async fn close(&self) {
        if let Some(task) = self.shared.heartbeat.lock().unwrap().take() {
            task.abort();
        }

        let mut conn = self.shared.conn.lock().await;
        if let Some(conn) = conn.take() {
            conn.read_task.abort();
        }

        fail_all_pending(&self.shared);
        self.shared.methods.lock().unwrap().clear();
        emit(&self.shared, ClientEvent::Disconnected);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(task) = self.shared.heartbeat.lock().unwrap().take() {
            task.abort();
        }
        if let Ok(mut conn) = self.shared.conn.try_lock() {
            if let Some(conn) = conn.take() {
                conn.read_task.abort();
            }
        }
    }
}

/// Client state shared with the read and heartbeat tasks.
struct Shared {
    endpoint: Endpoint,
    timeout: Duration,
    ping: Duration,
    reconnect: bool,
    max_frame_size: usize,
    writer_config: WriterConfig,
    /// Correlation-id generator: strictly increasing per client instance.
    next_id: AtomicU64,
    /// Pending-call table: correlation id -> settlement channel. Entries
    /// are removed exactly once - on response, teardown, or timeout.
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>,
    /// Discovered method surface; cleared on every (re)connect attempt.
    methods: Mutex<Vec<String>>,
    /// Live session, if any. The lock also serializes (re)connect attempts.
    conn: tokio::sync::Mutex<Option<Conn>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ClientEvent>,
}

/// One established session.
struct Conn {
    writer: WriterHandle,
    read_task: JoinHandle<()>,
}

fn emit(shared: &Shared, event: ClientEvent) {
    let _ = shared.events.send(event);
}

/// Fail every pending call with `ConnectionClosed`.
fn fail_all_pending(shared: &Shared) {
    let drained: Vec<_> = {
        let mut pending = shared.pending.lock().unwrap();
        pending.drain().collect()
    };

    for (_, tx) in drained {
        let _ = tx.send(Err(SockwireError::ConnectionClosed));
    }
}

/// Establish a session: tear down the old one, connect, discover methods.
///
/// Holding the `conn` lock for the whole attempt serializes concurrent
/// reconnects and parks callers until the fresh writer is in place.
async fn open(shared: &Arc<Shared>) -> Result<()> {
    let mut conn_slot = shared.conn.lock().await;

    if let Some(old) = conn_slot.take() {
        old.read_task.abort();
    }
    fail_all_pending(shared);
    shared.methods.lock().unwrap().clear();

    let stream = Stream::connect(&shared.endpoint).await?;
    let (read_half, write_half) = stream.into_split();

    let (writer, _writer_task) = spawn_writer_task(write_half, shared.writer_config.clone());
    let read_task = tokio::spawn(read_loop(read_half, shared.clone()));

    let names = match discover(shared, &writer).await {
        Ok(names) => names,
        Err(e) => {
            read_task.abort();
            return Err(e);
        }
    };

    *shared.methods.lock().unwrap() = names;
    *conn_slot = Some(Conn { writer, read_task });

    emit(shared, ClientEvent::Connected);
    Ok(())
}

/// Issue `__methods` and validate the reported name list.
async fn discover(shared: &Arc<Shared>, writer: &WriterHandle) -> Result<Vec<String>> {
    let listing = call_with(shared, writer, METHODS_METHOD, Vec::new()).await?;

    let items = match listing {
        Value::Array(items) => items,
        _ => return Err(SockwireError::InvalidMethodList),
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::String(name) => Ok(name),
            _ => Err(SockwireError::InvalidMethodList),
        })
        .collect()
}

/// Invoke a method over the current session.
async fn raw_call(shared: &Arc<Shared>, name: &str, args: Vec<Value>) -> Result<Value> {
    let writer = {
        let conn = shared.conn.lock().await;
        match conn.as_ref() {
            Some(conn) => conn.writer.clone(),
            None => return Err(SockwireError::ConnectionClosed),
        }
    };

    call_with(shared, &writer, name, args).await
}

/// Send one correlated request and race response, transport error, and
/// timeout. Exactly one of them settles the call; the pending entry is
/// removed exactly once.
async fn call_with(
    shared: &Arc<Shared>,
    writer: &WriterHandle,
    name: &str,
    args: Vec<Value>,
) -> Result<Value> {
    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);

    let (tx, rx) = oneshot::channel();
    shared.pending.lock().unwrap().insert(id, tx);

    let payload = match Request::new(id, name, args).encode() {
        Ok(payload) => payload,
        Err(e) => {
            shared.pending.lock().unwrap().remove(&id);
            return Err(e);
        }
    };

    if let Err(e) = writer.send(OutboundFrame::new(Bytes::from(payload))).await {
        shared.pending.lock().unwrap().remove(&id);
        return Err(e);
    }

    match tokio::time::timeout(shared.timeout, rx).await {
        Ok(Ok(outcome)) => outcome,
        // Settlement channel dropped without a verdict: session torn down.
        Ok(Err(_)) => Err(SockwireError::ConnectionClosed),
        Err(_) => {
            shared.pending.lock().unwrap().remove(&id);
            Err(SockwireError::Timeout)
        }
    }
}

/// Per-session read loop: reassemble frames, settle matching pending calls.
///
/// A response whose id has no pending entry is a late arrival for a call
/// that already timed out; it is discarded without touching anything else.
async fn read_loop(mut reader: tokio::io::ReadHalf<Stream>, shared: Arc<Shared>) {
    let mut buffer = FrameBuffer::with_max_frame_size(shared.max_frame_size);
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                emit(&shared, ClientEvent::Error(e.to_string()));
                break;
            }
        };

        let payloads = match buffer.push(&buf[..n]) {
            Ok(p) => p,
            Err(e) => {
                emit(&shared, ClientEvent::Error(e.to_string()));
                break;
            }
        };

        for payload in payloads {
            match Response::from_slice(&payload) {
                Ok(res) => {
                    let entry = shared.pending.lock().unwrap().remove(&res.id);
                    match entry {
                        Some(tx) => {
                            let outcome = if res.success {
                                Ok(res.data)
                            } else {
                                Err(SockwireError::Remote(res.data))
                            };
                            let _ = tx.send(outcome);
                        }
                        None => {
                            tracing::debug!(id = res.id, "late response discarded");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("dropping malformed response frame: {}", e);
                }
            }
        }
    }

    fail_all_pending(&shared);
    emit(&shared, ClientEvent::Disconnected);
}

/// Heartbeat loop: probe liveness at a fixed cadence.
///
/// On ping failure with `reconnect` enabled the whole session is rebuilt;
/// success or failure, the loop keeps its cadence, so an unreachable
/// server is retried indefinitely. Without `reconnect` the loop ends and
/// the connection stays dead until the caller reconnects explicitly.
async fn heartbeat(shared: Arc<Shared>) {
    loop {
        tokio::time::sleep(shared.ping).await;

        match raw_call(&shared, PING_METHOD, Vec::new()).await {
            Ok(_) => {}
            Err(err) => {
                tracing::debug!("heartbeat failed: {}", err);

                if !shared.reconnect {
                    break;
                }

                emit(&shared, ClientEvent::Reconnecting);
                if let Err(e) = open(&shared).await {
                    emit(&shared, ClientEvent::Error(e.to_string()));
                    tracing::debug!("reconnect attempt failed: {}", e);
                }
            }
        }
    }
}
