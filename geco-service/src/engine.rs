//! Bus mode controller.
//!
//! In direct mode the engine is the bus master: it reads the status and
//! config blocks every poll interval and services config writes as they
//! arrive, without waiting for the next poll. In eavesdrop mode it listens
//! to an existing master and keeps the latest values from whatever traffic
//! goes by.
//!
//! Readings are published two ways: [`Engine::latest_values`] for the
//! current picture, and [`Engine::subscribe`] for a stream of updates.

use crate::config::Config;
use crate::error::ServiceError;
use chrono::{DateTime, Utc};
use geco_client::{
    BusMode, Client, ClientError, ConnectionState, Connector, Observation, TcpConnector, WriteAck,
};
use geco_registers::{Block, RawDump, RegisterError, Value, Values};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio::time::MissedTickBehavior;

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    /// How long an eavesdropping engine waits for traffic before logging
    /// that the bus is quiet.
    pub listen_timeout: Duration,
    /// Write requests that may wait for the engine.
    pub command_capacity: usize,
    /// Updates buffered per subscriber.
    pub update_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            listen_timeout: Duration::from_secs(30),
            command_capacity: 16,
            update_capacity: 64,
        }
    }
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            listen_timeout: config.poll_interval(),
            ..Self::default()
        }
    }
}

/// What produced an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateSource {
    Poll,
    Write,
    Observed,
}

/// New values for (part of) a block.
#[derive(Debug, Clone, Serialize)]
pub struct Update {
    pub block: Block,
    pub source: UpdateSource,
    pub values: Values,
    pub at: DateTime<Utc>,
}

/// Engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub polls: u64,
    pub poll_failures: u64,
    pub writes: u64,
    pub write_failures: u64,
    pub observations: u64,
}

#[derive(Default)]
struct Counters {
    polls: AtomicU64,
    poll_failures: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
    observations: AtomicU64,
}

#[derive(Debug, Default)]
struct BlockState {
    values: Values,
    raw: Option<Vec<u8>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Latest {
    status: BlockState,
    config: BlockState,
}

impl Latest {
    fn get(&self, block: Block) -> &BlockState {
        match block {
            Block::Status => &self.status,
            Block::Config => &self.config,
        }
    }

    fn get_mut(&mut self, block: Block) -> &mut BlockState {
        match block {
            Block::Status => &mut self.status,
            Block::Config => &mut self.config,
        }
    }
}

enum Command {
    Write {
        name: String,
        value: Value,
        reply: oneshot::Sender<Result<WriteAck, ServiceError>>,
    },
}

/// Drives a [`Client`] according to its bus mode.
pub struct Engine<C: Connector> {
    client: Client<C>,
    config: EngineConfig,
    commands: mpsc::Sender<Command>,
    pending: Mutex<Option<mpsc::Receiver<Command>>>,
    latest: RwLock<Latest>,
    updates: broadcast::Sender<Update>,
    counters: Counters,
    shutdown: AtomicBool,
    notify: Notify,
}

impl Engine<TcpConnector> {
    /// Builds an engine for the configured adapter.
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        config.validate()?;
        let client = Client::new(config.connector(), config.client_config());
        Ok(Self::new(client, EngineConfig::from_config(config)))
    }
}

impl<C: Connector> Engine<C> {
    pub fn new(client: Client<C>, config: EngineConfig) -> Self {
        let (commands, pending) = mpsc::channel(config.command_capacity.max(1));
        let (updates, _) = broadcast::channel(config.update_capacity.max(1));
        Self {
            client,
            config,
            commands,
            pending: Mutex::new(Some(pending)),
            latest: RwLock::new(Latest::default()),
            updates,
            counters: Counters::default(),
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn client(&self) -> &Client<C> {
        &self.client
    }

    pub fn mode(&self) -> BusMode {
        self.client.mode()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.connection_state()
    }

    /// Latest decoded values of a block, if anything has been seen yet.
    pub fn latest_values(&self, block: Block) -> Option<Values> {
        let latest = self.latest.read();
        let state = latest.get(block);
        state.updated_at.map(|_| state.values.clone())
    }

    pub fn latest_status(&self) -> Option<Values> {
        self.latest_values(Block::Status)
    }

    pub fn latest_config(&self) -> Option<Values> {
        self.latest_values(Block::Config)
    }

    /// When a block was last updated.
    pub fn updated_at(&self, block: Block) -> Option<DateTime<Utc>> {
        self.latest.read().get(block).updated_at
    }

    /// Raw view of the latest complete copy of a block.
    pub fn raw_dump(&self, block: Block) -> Option<RawDump> {
        let latest = self.latest.read();
        latest
            .get(block)
            .raw
            .as_deref()
            .map(|raw| self.client.map().raw_dump(block, raw))
    }

    /// Subscribes to value updates.
    pub fn subscribe(&self) -> broadcast::Receiver<Update> {
        self.updates.subscribe()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            polls: self.counters.polls.load(Ordering::Relaxed),
            poll_failures: self.counters.poll_failures.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
            observations: self.counters.observations.load(Ordering::Relaxed),
        }
    }

    /// Parses `input` as a value for the config register `name`.
    pub fn parse_config_value(&self, name: &str, input: &str) -> Result<Value, ServiceError> {
        let map = self.client.map();
        if map.get(Block::Status, name).is_some() {
            return Err(ClientError::from(RegisterError::ReadOnly {
                name: name.to_string(),
            })
            .into());
        }
        let def = map
            .get(Block::Config, name)
            .ok_or_else(|| RegisterError::UnknownRegister {
                name: name.to_string(),
            })
            .map_err(ClientError::from)?;
        Ok(def.parse_value(input).map_err(ClientError::from)?)
    }

    /// Writes one config register.
    ///
    /// Mode, name and value are checked before the request is queued, so a
    /// rejected write never waits for the bus. An accepted write is
    /// serviced as soon as the current exchange finishes.
    pub async fn set_config_value(
        &self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<WriteAck, ServiceError> {
        let value = value.into();
        let mode = self.client.mode();
        if !mode.can_transmit() {
            return Err(ClientError::ModeNotSupported { mode }.into());
        }
        self.client.validate_write(name, &value)?;
        if self.is_shutdown() {
            return Err(ServiceError::ShuttingDown);
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Write {
                name: name.to_string(),
                value,
                reply,
            })
            .await
            .map_err(|_| ServiceError::ShuttingDown)?;
        response.await.map_err(|_| ServiceError::ShuttingDown)?
    }

    /// Runs until [`Engine::shutdown`] is called.
    pub async fn run(&self) -> Result<(), ServiceError> {
        let mut commands = self
            .pending
            .lock()
            .take()
            .ok_or(ServiceError::AlreadyRunning)?;

        tracing::info!(
            "Engine started in {} mode (poll interval {:?})",
            self.client.mode(),
            self.config.poll_interval
        );

        match self.client.mode() {
            BusMode::Direct => self.run_direct(&mut commands).await,
            BusMode::Eavesdrop => self.run_listen(&mut commands).await,
        }

        commands.close();
        while let Ok(Command::Write { reply, .. }) = commands.try_recv() {
            let _ = reply.send(Err(ServiceError::ShuttingDown));
        }
        self.client.close().await;

        tracing::info!("Engine stopped");
        Ok(())
    }

    /// Stops the engine, abandoning any exchange in flight.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Direct mode
    // =========================================================================

    async fn run_direct(&self, commands: &mut mpsc::Receiver<Command>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut state = self.client.subscribe_state();

        while !self.is_shutdown() {
            let backing_off = *state.borrow_and_update() == ConnectionState::Backoff;

            // Queued writes go ahead of a due poll.
            tokio::select! {
                biased;
                _ = self.notify.notified() => {}
                Some(command) = commands.recv() => {
                    self.until_shutdown(self.execute(command)).await;
                }
                _ = ticker.tick() => {
                    if backing_off {
                        tracing::debug!("Skipping poll while reconnecting");
                    } else {
                        self.until_shutdown(self.poll_cycle()).await;
                    }
                }
                result = self.client.reconnect(), if backing_off => match result {
                    Ok(()) => {
                        tracing::info!("Reconnected, polling now");
                        self.until_shutdown(self.poll_cycle()).await;
                        ticker.reset();
                    }
                    Err(e) => tracing::warn!("Reconnect failed: {}", e),
                },
            }
        }
    }

    async fn poll_cycle(&self) {
        for block in Block::ALL {
            match self.client.read_block(block).await {
                Ok(reading) => {
                    self.counters.polls.fetch_add(1, Ordering::Relaxed);
                    self.record(
                        block,
                        reading.values,
                        Some(reading.raw),
                        reading.received_at,
                        UpdateSource::Poll,
                    );
                }
                Err(e) => {
                    self.counters.poll_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Failed to read {} block: {}", block, e);
                    if matches!(e, ClientError::ConnectionLost(_) | ClientError::Io(_)) {
                        break;
                    }
                }
            }
        }
    }

    async fn execute(&self, command: Command) {
        match command {
            Command::Write { name, value, reply } => {
                let result = self.apply_write(&name, value).await;
                match &result {
                    Ok(_) => {
                        self.counters.writes.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("Write of {} failed: {}", name, e);
                    }
                }
                let _ = reply.send(result.map_err(ServiceError::from));
            }
        }
    }

    /// Writes through the client, reading the config block first when no
    /// fresh copy is cached.
    async fn apply_write(&self, name: &str, value: Value) -> Result<WriteAck, ClientError> {
        let ack = match self.client.write_register(name, value.clone()).await {
            Err(ClientError::NotReady) => {
                tracing::info!("No fresh config block cached, reading it before writing {}", name);
                let reading = self.client.read_config().await?;
                self.record(
                    Block::Config,
                    reading.values,
                    Some(reading.raw),
                    reading.received_at,
                    UpdateSource::Poll,
                );
                self.client.write_register(name, value).await?
            }
            other => other?,
        };

        if let Some(raw) = self.client.cached_config().await {
            let values = self.client.map().decode(Block::Config, &raw)?;
            self.record(Block::Config, values, Some(raw), Utc::now(), UpdateSource::Write);
        }
        Ok(ack)
    }

    // =========================================================================
    // Eavesdrop mode
    // =========================================================================

    async fn run_listen(&self, commands: &mut mpsc::Receiver<Command>) {
        let mut state = self.client.subscribe_state();

        while !self.is_shutdown() {
            let backing_off = *state.borrow_and_update() == ConnectionState::Backoff;

            tokio::select! {
                biased;
                _ = self.notify.notified() => {}
                Some(command) = commands.recv() => self.execute(command).await,
                result = self.client.reconnect(), if backing_off => match result {
                    Ok(()) => tracing::info!("Reconnected, listening"),
                    Err(e) => tracing::warn!("Reconnect failed: {}", e),
                },
                result = self.client.next_observation(self.config.listen_timeout), if !backing_off => {
                    match result {
                        Ok(Some(observation)) => self.observe(observation),
                        Ok(None) => tracing::debug!(
                            "No traffic for {:?}",
                            self.config.listen_timeout
                        ),
                        Err(e) => tracing::warn!("Listening failed: {}", e),
                    }
                }
            }
        }
    }

    fn observe(&self, observation: Observation) {
        self.counters.observations.fetch_add(1, Ordering::Relaxed);
        let block = observation.block;
        if observation.values.is_empty() {
            return;
        }

        let offset = usize::from(observation.first_register.saturating_sub(block.base_register())) * 2;
        let complete = offset == 0 && observation.raw.len() == block.byte_len();
        {
            let mut latest = self.latest.write();
            let state = latest.get_mut(block);
            state.values.extend(observation.values.clone());
            if complete {
                state.raw = Some(observation.raw);
            } else if let Some(raw) = state.raw.as_mut() {
                // Patch the window into the last complete copy.
                if let Some(window) = raw.get_mut(offset..offset + observation.raw.len()) {
                    window.copy_from_slice(&observation.raw);
                }
            }
            state.updated_at = Some(observation.received_at);
        }

        let _ = self.updates.send(Update {
            block,
            source: UpdateSource::Observed,
            values: observation.values,
            at: observation.received_at,
        });
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn record(
        &self,
        block: Block,
        values: Values,
        raw: Option<Vec<u8>>,
        at: DateTime<Utc>,
        source: UpdateSource,
    ) {
        {
            let mut latest = self.latest.write();
            let state = latest.get_mut(block);
            state.values = values.clone();
            if raw.is_some() {
                state.raw = raw;
            }
            state.updated_at = Some(at);
        }
        // Nobody listening is fine.
        let _ = self.updates.send(Update {
            block,
            source,
            values,
            at,
        });
    }

    async fn until_shutdown<F: Future<Output = ()>>(&self, work: F) {
        tokio::select! {
            _ = work => {}
            _ = self.notify.notified() => {
                tracing::info!("Shutdown requested, abandoning exchange in flight");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use geco_client::{ClientConfig, QueuedConnector};
    use geco_protocol::{function, sub_function, Endpoint, Frame, FrameDecoder};
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;

    type Seen = Arc<Mutex<Vec<Frame>>>;
    type TestEngine = Engine<QueuedConnector<DuplexStream>>;

    fn status_block() -> Vec<u8> {
        let mut raw = vec![0u8; 100];
        raw[8..10].copy_from_slice(&(-388i16).to_be_bytes()); // T1
        raw[10..12].copy_from_slice(&450i16.to_be_bytes()); // T2
        raw
    }

    fn config_block() -> Vec<u8> {
        let mut raw: Vec<u8> = (0..100u8).map(|i| i.wrapping_mul(3)).collect();
        raw[10..12].copy_from_slice(&500u16.to_be_bytes()); // TapWaterTemp 50.0
        raw
    }

    /// Answers reads and applies block writes; records every request.
    fn spawn_heat_pump(stream: DuplexStream, config: Arc<Mutex<Vec<u8>>>) -> (Seen, JoinHandle<()>) {
        spawn_device(stream, config, Device::default())
    }

    #[derive(Clone, Copy, Default)]
    struct Device {
        status_delay: Duration,
        ignore_writes: bool,
    }

    fn spawn_device(
        mut stream: DuplexStream,
        config: Arc<Mutex<Vec<u8>>>,
        device: Device,
    ) -> (Seen, JoinHandle<()>) {
        let seen: Seen = Arc::default();
        let log = seen.clone();
        let handle = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 512];
            loop {
                let n = match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                decoder.extend(&buf[..n]);
                for request in decoder.drain_frames() {
                    log.lock().push(request.clone());
                    let data = match (request.function, request.sub_function) {
                        (function::STATUS_REQUEST, _) => {
                            if !device.status_delay.is_zero() {
                                tokio::time::sleep(device.status_delay).await;
                            }
                            Bytes::from(status_block())
                        }
                        (function::CONFIG_REQUEST, sub_function::WRITE) if device.ignore_writes => {
                            continue;
                        }
                        (function::CONFIG_REQUEST, sub_function::WRITE) => {
                            *config.lock() = request.data.to_vec();
                            request.data.clone()
                        }
                        _ => Bytes::from(config.lock().clone()),
                    };
                    let reply = request.response_to(data).encode().unwrap();
                    if stream.write_all(&reply).await.is_err() {
                        return;
                    }
                }
            }
        });
        (seen, handle)
    }

    fn direct_engine(client_config: ClientConfig) -> (Arc<TestEngine>, Seen, Arc<Mutex<Vec<u8>>>) {
        direct_engine_with(client_config, Device::default())
    }

    fn direct_engine_with(
        client_config: ClientConfig,
        device: Device,
    ) -> (Arc<TestEngine>, Seen, Arc<Mutex<Vec<u8>>>) {
        let (engine_side, device_side) = duplex(4096);
        let config = Arc::new(Mutex::new(config_block()));
        let (seen, _) = spawn_device(device_side, config.clone(), device);
        let client = Client::new(QueuedConnector::from_iter([engine_side]), client_config);
        (
            Arc::new(Engine::new(client, EngineConfig::default())),
            seen,
            config,
        )
    }

    fn spawn_run(engine: &Arc<TestEngine>) -> JoinHandle<Result<(), ServiceError>> {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    }

    fn requests(seen: &Seen) -> Vec<(u8, u8)> {
        seen.lock()
            .iter()
            .map(|frame| (frame.function, frame.sub_function))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_both_blocks_at_startup() {
        let (engine, _, _) = direct_engine(ClientConfig::default());
        assert!(engine.latest_status().is_none());
        let mut updates = engine.subscribe();
        let task = spawn_run(&engine);

        let status = updates.recv().await.unwrap();
        assert_eq!(status.block, Block::Status);
        assert_eq!(status.source, UpdateSource::Poll);
        assert_eq!(status.values["T1"], Value::Float(-38.8));
        let config = updates.recv().await.unwrap();
        assert_eq!(config.block, Block::Config);

        assert_eq!(engine.latest_status().unwrap()["T2"], Value::Float(45.0));
        assert_eq!(
            engine.latest_config().unwrap()["TapWaterTemp"],
            Value::Float(50.0)
        );
        let dump = engine.raw_dump(Block::Config).unwrap();
        assert_eq!(dump.registers[&305], 500);
        assert_eq!(dump.registers.len(), 50);
        assert_eq!(engine.stats().polls, 2);

        engine.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_is_serviced_between_polls() {
        let (engine, seen, device_config) = direct_engine(ClientConfig::default());
        let mut updates = engine.subscribe();
        let task = spawn_run(&engine);
        updates.recv().await.unwrap();
        updates.recv().await.unwrap();

        let ack = engine.set_config_value("TapWaterTemp", 55.0).await.unwrap();
        assert_eq!(ack.previous, Value::Float(50.0));
        assert_eq!(ack.value, Value::Float(55.0));

        // No extra poll ran ahead of the write.
        assert_eq!(
            requests(&seen),
            vec![
                (function::STATUS_REQUEST, sub_function::READ),
                (function::CONFIG_REQUEST, sub_function::READ),
                (function::CONFIG_REQUEST, sub_function::WRITE),
            ]
        );
        assert_eq!(&device_config.lock()[10..12], &550u16.to_be_bytes());

        let update = updates.recv().await.unwrap();
        assert_eq!(update.source, UpdateSource::Write);
        assert_eq!(update.values["TapWaterTemp"], Value::Float(55.0));
        assert_eq!(
            engine.latest_config().unwrap()["TapWaterTemp"],
            Value::Float(55.0)
        );
        assert_eq!(engine.stats().writes, 1);

        engine.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_write_goes_ahead_of_due_poll() {
        // Status replies take longer than the poll interval, so the next
        // tick is already due when the startup poll finishes.
        let device = Device {
            status_delay: Duration::from_secs(40),
            ..Device::default()
        };
        let (engine, seen, _) = direct_engine_with(
            ClientConfig::default().with_response_timeout(Duration::from_secs(60)),
            device,
        );
        let task = spawn_run(&engine);

        let writer = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.set_config_value("TapWaterTemp", 55.0).await })
        };
        writer.await.unwrap().unwrap();

        assert_eq!(
            requests(&seen)[..3],
            [
                (function::STATUS_REQUEST, sub_function::READ),
                (function::CONFIG_REQUEST, sub_function::READ),
                (function::CONFIG_REQUEST, sub_function::WRITE),
            ]
        );

        engine.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_with_stale_cache_reads_config_first() {
        let (engine, seen, _) =
            direct_engine(ClientConfig::default().with_cache_max_age(Duration::from_secs(1)));
        let mut updates = engine.subscribe();
        let task = spawn_run(&engine);
        updates.recv().await.unwrap();
        updates.recv().await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        engine.set_config_value("TapWaterTemp", 45.0).await.unwrap();

        assert_eq!(
            requests(&seen),
            vec![
                (function::STATUS_REQUEST, sub_function::READ),
                (function::CONFIG_REQUEST, sub_function::READ),
                (function::CONFIG_REQUEST, sub_function::READ),
                (function::CONFIG_REQUEST, sub_function::WRITE),
            ]
        );

        engine.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_writes_are_rejected_before_queueing() {
        // Not running: a queued write would never complete.
        let (engine, seen, _) = direct_engine(ClientConfig::default());

        for (name, value) in [
            ("TapWaterTemp", Value::Float(99.0)),
            ("T1", Value::Float(20.0)),
            ("NoSuchRegister", Value::Bool(true)),
            ("FanOperationMode", Value::Text("Turbo".to_string())),
        ] {
            let err = engine.set_config_value(name, value).await.unwrap_err();
            assert!(err.is_rejection(), "{name}: {err}");
        }
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_parse_config_value() {
        let (engine, _, _) = direct_engine(ClientConfig::default());
        assert_eq!(
            engine.parse_config_value("TapWaterTemp", "52.5").unwrap(),
            Value::Float(52.5)
        );
        assert!(engine.parse_config_value("T1", "20").unwrap_err().is_rejection());
        assert!(engine
            .parse_config_value("NoSuchRegister", "1")
            .unwrap_err()
            .is_rejection());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown() {
        let (engine, _, _) = direct_engine(ClientConfig::default());
        let mut updates = engine.subscribe();
        let task = spawn_run(&engine);
        updates.recv().await.unwrap();

        engine.shutdown();
        task.await.unwrap().unwrap();

        assert!(matches!(engine.run().await, Err(ServiceError::AlreadyRunning)));
        assert!(matches!(
            engine.set_config_value("TapWaterTemp", 50.0).await,
            Err(ServiceError::ShuttingDown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_unacknowledged_write() {
        let device = Device {
            ignore_writes: true,
            ..Device::default()
        };
        let (engine, seen, device_config) = direct_engine_with(
            ClientConfig::default().with_response_timeout(Duration::from_secs(60)),
            device,
        );
        let mut updates = engine.subscribe();
        let task = spawn_run(&engine);
        updates.recv().await.unwrap();
        updates.recv().await.unwrap();
        let cached = engine.client().cached_config().await;
        assert_eq!(cached, Some(config_block()));

        let writer = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.set_config_value("TapWaterTemp", 55.0).await })
        };
        while !requests(&seen).contains(&(function::CONFIG_REQUEST, sub_function::WRITE)) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        engine.shutdown();
        task.await.unwrap().unwrap();
        assert!(matches!(
            writer.await.unwrap(),
            Err(ServiceError::ShuttingDown)
        ));

        // The exchange lock was released and the cache still holds the
        // last block the device confirmed.
        let after = tokio::time::timeout(Duration::from_secs(1), engine.client().cached_config())
            .await
            .unwrap();
        assert_eq!(after, cached);
        assert_eq!(*device_config.lock(), config_block());
        assert_eq!(
            engine.latest_config().unwrap()["TapWaterTemp"],
            Value::Float(50.0)
        );
        assert_eq!(engine.stats().writes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_resumes_after_reconnect() {
        let (first, first_device) = duplex(4096);
        let (second, second_device) = duplex(4096);
        let device_config = Arc::new(Mutex::new(config_block()));
        let (_, first_handle) = spawn_heat_pump(first_device, device_config.clone());
        let (second_seen, _) = spawn_heat_pump(second_device, device_config);

        let connector = QueuedConnector::from_iter([first, second]);
        let engine = Arc::new(Engine::new(
            Client::new(connector, ClientConfig::default()),
            EngineConfig::default(),
        ));
        let mut updates = engine.subscribe();
        let task = spawn_run(&engine);
        updates.recv().await.unwrap();
        updates.recv().await.unwrap();

        // Adapter drops the connection.
        first_handle.abort();
        let _ = first_handle.await;

        // The next poll fails, the engine backs off and reconnects, then
        // polls straight away.
        let update = updates.recv().await.unwrap();
        assert_eq!(update.block, Block::Status);
        assert_eq!(engine.connection_state(), ConnectionState::Connected);
        assert_eq!(second_seen.lock()[0].function, function::STATUS_REQUEST);
        assert!(engine.stats().poll_failures >= 1);

        engine.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_eavesdrop_tracks_master_traffic() {
        let (engine_side, mut bus) = duplex(4096);
        let client = Client::new(
            QueuedConnector::from_iter([engine_side]),
            ClientConfig::default().with_mode(BusMode::Eavesdrop),
        );
        let engine = Arc::new(Engine::new(client, EngineConfig::default()));
        let mut updates = engine.subscribe();
        let task = spawn_run(&engine);

        let master = Endpoint::new(1, 1);
        let pump = Endpoint::new(2, 2);
        let request = Frame::read_request(master, pump, function::STATUS_REQUEST, 100, 50);
        let response = request.response_to(Bytes::from(status_block()));
        let window = Frame::read_request(master, pump, function::STATUS_REQUEST, 104, 1)
            .response_to(Bytes::from_static(&[0x00, 0xC8]));
        bus.write_all(&request.encode().unwrap()).await.unwrap();
        bus.write_all(&response.encode().unwrap()).await.unwrap();

        let update = updates.recv().await.unwrap();
        assert_eq!(update.source, UpdateSource::Observed);
        assert_eq!(update.values["T1"], Value::Float(-38.8));
        assert_eq!(engine.raw_dump(Block::Status).unwrap().registers[&104], 0xFE7C);

        // A partial window updates only what it covers.
        bus.write_all(&window.encode().unwrap()).await.unwrap();
        let update = updates.recv().await.unwrap();
        assert_eq!(update.values.len(), 1);
        let status = engine.latest_status().unwrap();
        assert_eq!(status["T1"], Value::Float(20.0));
        assert_eq!(status["T2"], Value::Float(45.0));
        assert_eq!(engine.raw_dump(Block::Status).unwrap().registers[&104], 200);

        let err = engine.set_config_value("TapWaterTemp", 50.0).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Client(ClientError::ModeNotSupported { .. })
        ));

        engine.shutdown();
        task.await.unwrap().unwrap();

        // Nothing was ever sent onto the bus.
        let mut sent = Vec::new();
        bus.read_to_end(&mut sent).await.unwrap();
        assert!(sent.is_empty());
    }
}
