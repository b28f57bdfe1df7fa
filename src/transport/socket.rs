//! Endpoint addressing and socket wrappers.
//!
//! An [`Endpoint`] is either a TCP address or a filesystem path to a Unix
//! domain socket. [`Listener`] and [`Stream`] wrap the matching tokio types
//! and erase the difference for the layers above.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

use crate::error::Result;

/// A transport endpoint: TCP address or Unix socket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP `(host, port)` endpoint.
    Tcp(SocketAddr),
    /// Filesystem-path local domain socket.
    Unix(PathBuf),
}

impl Endpoint {
    /// TCP endpoint from anything addr-like.
    pub fn tcp(addr: impl Into<SocketAddr>) -> Self {
        Self::Tcp(addr.into())
    }

    /// Unix-socket endpoint from a filesystem path.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::Unix(path.into())
    }

    /// The socket path, for Unix endpoints.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Tcp(_) => None,
            Self::Unix(path) => Some(path),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::Tcp(addr)
    }
}

impl From<PathBuf> for Endpoint {
    fn from(path: PathBuf) -> Self {
        Self::Unix(path)
    }
}

impl From<&Path> for Endpoint {
    fn from(path: &Path) -> Self {
        Self::Unix(path.to_path_buf())
    }
}

/// Listening socket bound to an endpoint.
///
/// Unix listeners unlink their socket file on drop, so a cleanly stopped
/// server leaves no artifact behind.
pub enum Listener {
    /// Bound TCP listener.
    Tcp(TcpListener),
    /// Bound Unix listener plus the path to unlink on drop.
    Unix(UnixListener, PathBuf),
}

impl Listener {
    /// Bind to the endpoint. Resolves once the socket is accepting.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Self::Tcp(TcpListener::bind(addr).await?)),
            Endpoint::Unix(path) => Ok(Self::Unix(UnixListener::bind(path)?, path.clone())),
        }
    }

    /// Accept one connection.
    pub async fn accept(&self) -> Result<Stream> {
        match self {
            Self::Tcp(listener) => {
                let (stream, _addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok(Stream::Tcp(stream))
            }
            Self::Unix(listener, _) => {
                let (stream, _addr) = listener.accept().await?;
                Ok(Stream::Unix(stream))
            }
        }
    }

    /// The endpoint actually bound. For TCP this carries the OS-assigned
    /// port when binding to port 0.
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match self {
            Self::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?)),
            Self::Unix(_, path) => Ok(Endpoint::Unix(path.clone())),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Self::Unix(_, path) = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// A connected stream over either endpoint kind.
pub enum Stream {
    /// Connected TCP stream.
    Tcp(TcpStream),
    /// Connected Unix stream.
    Unix(UnixStream),
}

impl Stream {
    /// Open an outbound connection to the endpoint.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                // Small correlated frames; coalescing only adds latency.
                stream.set_nodelay(true)?;
                Ok(Self::Tcp(stream))
            }
            Endpoint::Unix(path) => Ok(Self::Unix(UnixStream::connect(path).await?)),
        }
    }

    /// Split into read and write halves.
    pub fn into_split(self) -> (tokio::io::ReadHalf<Stream>, tokio::io::WriteHalf<Stream>) {
        tokio::io::split(self)
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Self::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Self::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            Self::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Self::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_sock_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sockwire-transport-{}-{}.sock", tag, std::process::id()))
    }

    #[test]
    fn test_endpoint_display() {
        let tcp = Endpoint::tcp(([127, 0, 0, 1], 9000));
        assert_eq!(tcp.to_string(), "tcp://127.0.0.1:9000");

        let unix = Endpoint::unix("/tmp/app.sock");
        assert_eq!(unix.to_string(), "unix:///tmp/app.sock");
        assert_eq!(unix.path(), Some(Path::new("/tmp/app.sock")));
        assert_eq!(tcp.path(), None);
    }

    #[tokio::test]
    async fn test_tcp_bind_reports_assigned_port() {
        let listener = Listener::bind(&Endpoint::tcp(([127, 0, 0, 1], 0)))
            .await
            .unwrap();

        match listener.local_endpoint().unwrap() {
            Endpoint::Tcp(addr) => assert_ne!(addr.port(), 0),
            other => panic!("expected tcp endpoint, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_unix_listener_unlinks_on_drop() {
        let path = temp_sock_path("unlink");
        let _ = std::fs::remove_file(&path);

        let listener = Listener::bind(&Endpoint::unix(&*path)).await.unwrap();
        assert!(path.exists());

        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_connect_and_accept_roundtrip() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = Listener::bind(&Endpoint::tcp(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let endpoint = listener.local_endpoint().unwrap();

        let server = tokio::spawn(async move {
            let mut stream = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let mut client = Stream::connect(&endpoint).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.await.unwrap();
    }
}
