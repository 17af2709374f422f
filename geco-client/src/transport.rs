//! Persistent bus connection.
//!
//! One stream is kept open across exchanges. A failed read or write drops
//! it, moves the transport into [`ConnectionState::Backoff`] and fails the
//! current exchange at once; the next connect attempt waits out an
//! exponential delay that resets after a successful connect.

use crate::connector::Connector;
use crate::error::ClientError;
use geco_protocol::{DecoderStats, Frame, FrameDecoder};
use std::fmt;
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};
use tokio::sync::watch;
use tokio::time::Instant;

/// Default read buffer size. A frame is at most 263 bytes.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 512;

/// Lifecycle of the bus connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting before the next connect attempt.
    Backoff,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Backoff => "backoff",
        };
        f.write_str(s)
    }
}

/// Exponential reconnect delay with a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(failures - 1);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub backoff: BackoffPolicy,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl TransportConfig {
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// A persistent, reconnecting byte stream with a frame decoder on top.
pub struct Transport<C: Connector> {
    connector: C,
    config: TransportConfig,
    stream: Option<C::Stream>,
    decoder: FrameDecoder,
    failures: u32,
    retry_at: Option<Instant>,
    state: watch::Sender<ConnectionState>,
}

impl<C: Connector> Transport<C> {
    /// Creates a transport (not yet connected).
    pub fn new(connector: C, config: TransportConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            config,
            stream: None,
            decoder: FrameDecoder::new(),
            failures: 0,
            retry_at: None,
            state,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribes to connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Consecutive failed connects or dropped connections.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// When the next connect attempt is allowed, if backing off.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Connects unless already connected. Inside a backoff period this fails
    /// immediately instead of waiting.
    pub async fn ensure_connected(&mut self) -> Result<(), ClientError> {
        if self.stream.is_some() {
            return Ok(());
        }
        if let Some(retry_at) = self.retry_at {
            let now = Instant::now();
            if now < retry_at {
                return Err(ClientError::ConnectionLost(format!(
                    "reconnecting in {:.1}s",
                    (retry_at - now).as_secs_f64()
                )));
            }
        }
        self.connect().await
    }

    /// Waits out the backoff delay, if any, then connects.
    pub async fn reconnect(&mut self) -> Result<(), ClientError> {
        self.close();
        if let Some(retry_at) = self.retry_at {
            tokio::time::sleep_until(retry_at).await;
        }
        self.connect().await
    }

    /// Drops the stream without counting a failure.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Closing connection to {}", self.connector.describe());
            self.decoder.clear();
            self.set_state(ConnectionState::Disconnected);
        }
    }

    async fn connect(&mut self) -> Result<(), ClientError> {
        self.set_state(ConnectionState::Connecting);
        match self.connector.connect().await {
            Ok(stream) => {
                tracing::info!("Connected to {}", self.connector.describe());
                self.stream = Some(stream);
                self.decoder.clear();
                self.failures = 0;
                self.retry_at = None;
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => Err(self.fail(format!(
                "connect to {} failed: {}",
                self.connector.describe(),
                e
            ))),
        }
    }

    /// Drops the stream and schedules the next connect attempt.
    fn fail(&mut self, reason: String) -> ClientError {
        self.stream = None;
        self.decoder.clear();
        self.failures = self.failures.saturating_add(1);
        let delay = self.config.backoff.delay(self.failures);
        self.retry_at = Some(Instant::now() + delay);
        tracing::warn!(
            failures = self.failures,
            "{}; retrying in {:.1}s",
            reason,
            delay.as_secs_f64()
        );
        self.set_state(ConnectionState::Backoff);
        ClientError::ConnectionLost(reason)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Connection state {} -> {}", previous, state);
        }
    }

    /// Writes a complete encoded frame.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.ensure_connected().await?;
        let Some(stream) = self.stream.as_mut() else {
            return Err(ClientError::ConnectionLost("not connected".to_string()));
        };

        tracing::debug!("TX ({} bytes): {}", bytes.len(), hex::encode(bytes));
        let result = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        }
        .await;

        result.map_err(|e| self.fail(format!("write failed: {}", e)))
    }

    /// Throws away bytes that already arrived, so a late reply to an
    /// abandoned exchange cannot answer the next one. Returns the number of
    /// bytes discarded.
    pub async fn discard_pending(&mut self) -> Result<usize, ClientError> {
        let mut discarded = self.decoder.buffered();
        self.decoder.clear();

        let Some(stream) = self.stream.as_mut() else {
            return Ok(discarded);
        };
        let mut buf = vec![0u8; self.config.read_buffer_size];
        loop {
            match read_ready(stream, &mut buf).await {
                None => break,
                Some(Ok(0)) => return Err(self.fail("connection closed by peer".to_string())),
                Some(Ok(n)) => discarded += n,
                Some(Err(e)) => return Err(self.fail(format!("read failed: {}", e))),
            }
        }

        if discarded > 0 {
            tracing::debug!("Discarded {} stale bytes", discarded);
        }
        Ok(discarded)
    }

    /// Reads until a frame accepted by `matches` arrives or `timeout`
    /// elapses (`Ok(None)`). Frames that don't match are skipped; corrupt
    /// bytes are resynchronized past.
    pub async fn receive_until<F>(
        &mut self,
        timeout: Duration,
        mut matches: F,
    ) -> Result<Option<Frame>, ClientError>
    where
        F: FnMut(&Frame) -> bool,
    {
        self.ensure_connected().await?;
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            loop {
                match self.decoder.decode_frame() {
                    Ok(Some(frame)) if matches(&frame) => return Ok(Some(frame)),
                    Ok(Some(frame)) => tracing::debug!(
                        "Skipping frame {:#04x} from {} to {}",
                        frame.function,
                        frame.source,
                        frame.destination
                    ),
                    Ok(None) => break,
                    Err(e) => tracing::debug!("Resynchronizing: {}", e),
                }
            }

            let Some(stream) = self.stream.as_mut() else {
                return Err(ClientError::ConnectionLost("not connected".to_string()));
            };
            let read = match tokio::time::timeout_at(deadline, stream.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => return Ok(None),
            };

            match read {
                Ok(0) => return Err(self.fail("connection closed by peer".to_string())),
                Ok(n) => {
                    tracing::debug!("RX ({} bytes): {}", n, hex::encode(&buf[..n]));
                    self.decoder.extend(&buf[..n]);
                }
                Err(e) => return Err(self.fail(format!("read failed: {}", e))),
            }
        }
    }
}

/// Reads whatever is available right now without waiting.
async fn read_ready<S>(stream: &mut S, buf: &mut [u8]) -> Option<std::io::Result<usize>>
where
    S: AsyncRead + Unpin,
{
    std::future::poll_fn(|cx| {
        let mut read_buf = ReadBuf::new(&mut *buf);
        match Pin::new(&mut *stream).poll_read(cx, &mut read_buf) {
            Poll::Pending => Poll::Ready(None),
            Poll::Ready(result) => Poll::Ready(Some(result.map(|()| read_buf.filled().len()))),
        }
    })
    .await
}
