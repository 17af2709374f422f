//! # geco-service
//!
//! Long-running service around the GECO client.
//!
//! This crate provides:
//! - The bus mode controller: scheduled polling as master, or passive listening
//! - On-demand config writes that interrupt the poll wait
//! - Latest decoded readings and raw dumps for a publishing layer
//! - YAML and environment configuration

pub mod config;
pub mod engine;
pub mod error;

pub use config::{
    AddressConfig, BusConfig, Config, ConfigError, DeviceConfig, PollingConfig, ReconnectConfig,
};
pub use engine::{Engine, EngineConfig, EngineStats, Update, UpdateSource};
pub use error::ServiceError;
