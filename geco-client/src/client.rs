//! High-level client API.
//!
//! Every bus exchange runs under a single FIFO lock: the bus is half
//! duplex, so a poll and a write issued at the same time are sent one after
//! the other, in the order they asked, never interleaved.

use crate::cache::{ConfigWriteCache, DEFAULT_MAX_AGE};
use crate::connector::Connector;
use crate::error::ClientError;
use crate::mode::BusMode;
use crate::transport::{ConnectionState, Transport, TransportConfig};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use geco_protocol::{function, Endpoint, Frame};
use geco_registers::{Block, RegisterDefinition, RegisterError, RegisterMap, Value, Values};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Our address on the bus (the master's address when eavesdropping).
    pub controller: Endpoint,
    /// The heat pump's address.
    pub device: Endpoint,
    pub mode: BusMode,
    /// How long to wait for a response before retrying.
    pub response_timeout: Duration,
    /// Retries after the first attempt.
    pub retries: u32,
    /// Maximum age of the cached config block a write may start from.
    pub cache_max_age: Duration,
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            controller: Endpoint::new(1, 1),
            device: Endpoint::new(2, 2),
            mode: BusMode::Direct,
            response_timeout: Duration::from_secs(5),
            retries: 2,
            cache_max_age: DEFAULT_MAX_AGE,
            transport: TransportConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_endpoints(mut self, controller: Endpoint, device: Endpoint) -> Self {
        self.controller = controller;
        self.device = device;
        self
    }

    pub fn with_mode(mut self, mode: BusMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_cache_max_age(mut self, max_age: Duration) -> Self {
        self.cache_max_age = max_age;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

/// What the client is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    Idle,
    AwaitingStatusResponse,
    AwaitingConfigResponse,
    AwaitingWriteAck,
}

/// A decoded block read from the device.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    pub block: Block,
    pub values: Values,
    #[serde(skip)]
    pub raw: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// Result of a confirmed register write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteAck {
    pub register: String,
    pub previous: Value,
    pub value: Value,
}

/// Kind of frame seen while listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    StatusResponse,
    ConfigResponse,
    /// A block write sent by the bus master.
    ConfigWrite,
}

impl ObservationKind {
    pub fn block(self) -> Block {
        match self {
            ObservationKind::StatusResponse => Block::Status,
            ObservationKind::ConfigResponse | ObservationKind::ConfigWrite => Block::Config,
        }
    }
}

/// Register data observed on a bus with another master.
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub kind: ObservationKind,
    pub block: Block,
    pub first_register: u16,
    pub values: Values,
    #[serde(skip)]
    pub raw: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

struct Exchange<C: Connector> {
    transport: Transport<C>,
    cache: ConfigWriteCache,
}

/// Resets the phase to idle when an exchange ends, including by cancellation.
struct PhaseGuard<'a>(&'a watch::Sender<ExchangePhase>);

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(ExchangePhase::Idle);
    }
}

/// High-level client for a GECO device.
pub struct Client<C: Connector> {
    config: ClientConfig,
    map: &'static RegisterMap,
    exchange: Mutex<Exchange<C>>,
    state: watch::Receiver<ConnectionState>,
    phase: watch::Sender<ExchangePhase>,
}

impl<C: Connector> Client<C> {
    /// Creates a new client using the PCWU register map (not yet connected).
    pub fn new(connector: C, config: ClientConfig) -> Self {
        let transport = Transport::new(connector, config.transport.clone());
        let state = transport.subscribe();
        let cache = ConfigWriteCache::new(config.cache_max_age);
        let (phase, _) = watch::channel(ExchangePhase::Idle);
        Self {
            config,
            map: RegisterMap::pcwu(),
            exchange: Mutex::new(Exchange { transport, cache }),
            state,
            phase,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn mode(&self) -> BusMode {
        self.config.mode
    }

    pub fn map(&self) -> &'static RegisterMap {
        self.map
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribes to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn phase(&self) -> ExchangePhase {
        *self.phase.borrow()
    }

    /// The cached config block, regardless of age.
    pub async fn cached_config(&self) -> Option<Vec<u8>> {
        self.exchange.lock().await.cache.raw().map(<[u8]>::to_vec)
    }

    /// When the transport will next try to connect, if it is backing off.
    pub async fn retry_at(&self) -> Option<Instant> {
        self.exchange.lock().await.transport.retry_at()
    }

    /// Connects unless already connected.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.exchange.lock().await.transport.ensure_connected().await
    }

    /// Waits out the reconnect delay, then connects. The exchange lock is
    /// not held while waiting.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        if let Some(retry_at) = self.retry_at().await {
            tokio::time::sleep_until(retry_at).await;
        }
        let mut exchange = self.exchange.lock().await;
        if exchange.transport.is_connected() {
            return Ok(());
        }
        exchange.transport.reconnect().await
    }

    /// Closes the connection. The cached config block is kept.
    pub async fn close(&self) {
        self.exchange.lock().await.transport.close();
    }

    // =========================================================================
    // Direct mode
    // =========================================================================

    /// Reads and decodes the status block.
    pub async fn read_status(&self) -> Result<Reading, ClientError> {
        self.read_block(Block::Status).await
    }

    /// Reads and decodes the config block and refreshes the write cache.
    pub async fn read_config(&self) -> Result<Reading, ClientError> {
        self.read_block(Block::Config).await
    }

    /// Reads and decodes a block.
    pub async fn read_block(&self, block: Block) -> Result<Reading, ClientError> {
        self.require_transmit()?;
        let mut exchange = self.exchange.lock().await;

        let request = Frame::read_request(
            self.config.controller,
            self.config.device,
            request_function(block),
            block.base_register(),
            block.register_count(),
        );
        let phase = match block {
            Block::Status => ExchangePhase::AwaitingStatusResponse,
            Block::Config => ExchangePhase::AwaitingConfigResponse,
        };
        let response = self.transact(&mut exchange, &request, phase).await?;

        let values = self.map.decode(block, &response.data)?;
        let raw = response.data.to_vec();
        if block == Block::Config {
            exchange.cache.store(raw.clone());
        }
        tracing::debug!("Read {} block ({} registers)", block, values.len());

        Ok(Reading {
            block,
            values,
            raw,
            received_at: Utc::now(),
        })
    }

    /// Checks that `name` can be written with `value`, without touching the
    /// bus.
    pub fn validate_write(
        &self,
        name: &str,
        value: &Value,
    ) -> Result<&'static RegisterDefinition, ClientError> {
        if let Some(def) = self.map.get(Block::Status, name) {
            return Err(RegisterError::ReadOnly {
                name: def.name.to_string(),
            }
            .into());
        }
        Ok(self.map.validate(Block::Config, name, value)?)
    }

    /// Changes one config register.
    ///
    /// The whole config block is written: the cached block with only the
    /// target register's bytes replaced. Fails with [`ClientError::NotReady`]
    /// when no fresh block is cached. The cache is updated only once the
    /// device has acknowledged the write.
    pub async fn write_register(
        &self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<WriteAck, ClientError> {
        let value = value.into();
        self.require_transmit()?;
        let def = self.validate_write(name, &value)?;

        let mut exchange = self.exchange.lock().await;
        let current = exchange
            .cache
            .usable()
            .map(<[u8]>::to_vec)
            .ok_or(ClientError::NotReady)?;
        let updated = self.map.encode(Block::Config, &current, name, &value)?;
        let previous = def.decode(&current[def.span()]);

        tracing::info!(
            "Writing {} = {} (was {}, bytes {:?})",
            name,
            value,
            previous,
            def.span()
        );
        let request = Frame::write_request(
            self.config.controller,
            self.config.device,
            Block::Config.base_register(),
            Bytes::from(updated.clone()),
        );
        let ack = self
            .transact(&mut exchange, &request, ExchangePhase::AwaitingWriteAck)
            .await?;

        // A full echo is the block the device now holds.
        let stored = if ack.data.len() == Block::Config.byte_len() {
            if ack.data[def.span()] != updated[def.span()] {
                return Err(ClientError::WriteFailed {
                    register: name.to_string(),
                    reason: format!(
                        "device kept {} instead of {}",
                        def.decode(&ack.data[def.span()]),
                        value
                    ),
                });
            }
            ack.data.to_vec()
        } else {
            updated
        };

        let written = def.decode(&stored[def.span()]);
        exchange.cache.store(stored);
        tracing::info!("Write of {} confirmed: {}", name, written);

        Ok(WriteAck {
            register: name.to_string(),
            previous,
            value: written,
        })
    }

    /// Sends `request` and waits for the matching response, retrying on
    /// timeout. Connection loss fails at once.
    async fn transact(
        &self,
        exchange: &mut Exchange<C>,
        request: &Frame,
        phase: ExchangePhase,
    ) -> Result<Frame, ClientError> {
        let encoded = request.encode()?;
        let controller = self.config.controller;
        let device = self.config.device;
        let expected_function = request.expected_response_function();
        let register_start = request.register_start;
        let attempts = self.config.retries + 1;

        self.phase.send_replace(phase);
        let _idle = PhaseGuard(&self.phase);

        for attempt in 1..=attempts {
            exchange.transport.discard_pending().await?;
            exchange.transport.send(&encoded).await?;

            let response = exchange
                .transport
                .receive_until(self.config.response_timeout, |frame| {
                    frame.source == device
                        && frame.destination == controller
                        && frame.function == expected_function
                        && frame.register_start == register_start
                })
                .await?;

            match response {
                Some(frame) => return Ok(frame),
                None => tracing::warn!(
                    "No response to {:#04x} from {} (attempt {}/{})",
                    request.function,
                    device,
                    attempt,
                    attempts
                ),
            }
        }

        Err(ClientError::Timeout {
            timeout_ms: self.config.response_timeout.as_millis() as u64,
            attempts,
        })
    }

    fn require_transmit(&self) -> Result<(), ClientError> {
        if self.config.mode.can_transmit() {
            Ok(())
        } else {
            Err(ClientError::ModeNotSupported {
                mode: self.config.mode,
            })
        }
    }

    // =========================================================================
    // Eavesdrop mode
    // =========================================================================

    /// Waits for the next frame carrying register data between the
    /// configured controller and device, decoding whatever registers its
    /// window covers. Returns `None` when the bus stays quiet for
    /// `idle_timeout`. Never transmits.
    pub async fn next_observation(
        &self,
        idle_timeout: Duration,
    ) -> Result<Option<Observation>, ClientError> {
        let controller = self.config.controller;
        let device = self.config.device;
        let mut exchange = self.exchange.lock().await;

        let frame = exchange
            .transport
            .receive_until(idle_timeout, |frame| {
                frame.is_between(controller, device)
                    && (frame.is_response() || frame.is_block_write())
                    && !frame.data.is_empty()
            })
            .await?;
        let Some(frame) = frame else {
            return Ok(None);
        };

        let kind = match frame.function {
            function::STATUS_RESPONSE => ObservationKind::StatusResponse,
            function::CONFIG_RESPONSE => ObservationKind::ConfigResponse,
            _ => ObservationKind::ConfigWrite,
        };
        let block = kind.block();
        let values = self
            .map
            .decode_window(block, frame.register_start, &frame.data);
        tracing::debug!(
            "Observed {:?} for {} registers from {} ({} decoded)",
            kind,
            frame.register_count,
            frame.register_start,
            values.len()
        );

        Ok(Some(Observation {
            kind,
            block,
            first_register: frame.register_start,
            values,
            raw: frame.data.to_vec(),
            received_at: Utc::now(),
        }))
    }
}

/// Request function code for a block.
pub fn request_function(block: Block) -> u8 {
    match block {
        Block::Status => function::STATUS_REQUEST,
        Block::Config => function::CONFIG_REQUEST,
    }
}
