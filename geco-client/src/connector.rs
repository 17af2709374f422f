//! Stream connectors.
//!
//! The transport opens its byte stream through a [`Connector`], so the same
//! client runs against a TCP serial adapter or an in-memory stream.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Opens byte streams to the bus.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Opens a new stream.
    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;

    /// Human-readable peer description for logs.
    fn describe(&self) -> String;
}

/// Connects to a TCP-transparent RS485 adapter.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            addr: format!("{}:{}", host.into(), port),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        tracing::debug!("Connecting to {}...", self.addr);

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", self.addr),
                )
            })??;

        // Frames are small; don't let Nagle hold a request back.
        stream.set_nodelay(true).ok();
        Ok(stream)
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

/// Hands out pre-built streams in order; refuses once the queue is empty.
///
/// Used for replaying captured traffic and for driving the client against
/// in-memory devices.
pub struct QueuedConnector<S> {
    queue: Mutex<VecDeque<io::Result<S>>>,
}

impl<S> QueuedConnector<S> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Queues a stream for the next connect.
    pub fn push(&self, stream: S) {
        self.queue.lock().push_back(Ok(stream));
    }

    /// Queues a connect failure.
    pub fn push_error(&self, kind: io::ErrorKind) {
        self.queue
            .lock()
            .push_back(Err(io::Error::new(kind, "queued connect failure")));
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().len()
    }
}

impl<S> Default for QueuedConnector<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> FromIterator<S> for QueuedConnector<S> {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            queue: Mutex::new(iter.into_iter().map(Ok).collect()),
        }
    }
}

impl<S> Connector for QueuedConnector<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Stream = S;

    async fn connect(&self) -> io::Result<S> {
        let next = self.queue.lock().pop_front();
        next.unwrap_or_else(|| {
            Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "no queued stream",
            ))
        })
    }

    fn describe(&self) -> String {
        "queued".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queued_order() {
        let connector: QueuedConnector<tokio::io::DuplexStream> = QueuedConnector::new();
        let (a, _a_peer) = tokio::io::duplex(64);
        connector.push_error(io::ErrorKind::TimedOut);
        connector.push(a);
        assert_eq!(connector.remaining(), 2);

        let err = connector.connect().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(connector.connect().await.is_ok());

        let err = connector.connect().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_tcp_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connector = TcpConnector::new("127.0.0.1", port);
        assert_eq!(connector.describe(), format!("tcp://127.0.0.1:{port}"));

        let (client, server) = tokio::join!(connector.connect(), listener.accept());
        assert!(client.is_ok());
        assert!(server.is_ok());
    }
}
