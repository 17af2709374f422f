//! # geco-client
//!
//! Client library for GECO controllers.
//!
//! This crate provides:
//! - A persistent transport with reconnect-and-backoff
//! - Serialized status/config exchanges with retries
//! - Read-modify-write of single config registers over the cached block
//! - Passive listening on a bus that already has a master

pub mod cache;
pub mod client;
pub mod connector;
pub mod error;
pub mod mode;
pub mod transport;

pub use cache::ConfigWriteCache;
pub use client::{Client, ClientConfig, ExchangePhase, Observation, ObservationKind, Reading, WriteAck};
pub use connector::{Connector, QueuedConnector, TcpConnector};
pub use error::ClientError;
pub use mode::BusMode;
pub use transport::{BackoffPolicy, ConnectionState, Transport, TransportConfig};
