//! Service configuration.
//!
//! Loaded from a YAML file named by `GECO_CONFIG`, then overridden by
//! individual `GECO_*` environment variables.

use geco_client::{BackoffPolicy, BusMode, ClientConfig, TcpConnector, TransportConfig};
use geco_protocol::Endpoint;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Shortest and longest allowed poll interval, in seconds.
pub const POLL_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 5..=300;

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub bus: BusConfig,
    pub polling: PollingConfig,
    pub reconnect: ReconnectConfig,
}

/// The RS485 adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Adapter host name or IP address.
    pub address: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: "192.168.1.100".to_string(),
            port: 8899,
            connect_timeout_secs: 10,
        }
    }
}

/// A hard/soft address pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressConfig {
    pub hard_id: u8,
    pub soft_id: u8,
}

impl AddressConfig {
    pub fn endpoint(self) -> Endpoint {
        Endpoint::new(self.hard_id, self.soft_id)
    }
}

/// Bus role and addressing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub mode: BusMode,
    /// Our address, or the existing master's when eavesdropping.
    pub controller: AddressConfig,
    /// The heat pump's address.
    pub device: AddressConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mode: BusMode::Direct,
            controller: AddressConfig {
                hard_id: 1,
                soft_id: 1,
            },
            device: AddressConfig {
                hard_id: 2,
                soft_id: 2,
            },
        }
    }
}

/// Poll scheduling and exchange timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: u64,
    pub response_timeout_ms: u64,
    /// Retries after the first attempt.
    pub retries: u32,
    /// Maximum age of the cached config block a write may start from.
    pub cache_max_age_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            response_timeout_ms: 5000,
            retries: 2,
            cache_max_age_secs: 300,
        }
    }
}

/// Reconnect backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
        }
    }
}

impl Config {
    /// Loads from the file named by `GECO_CONFIG` (defaults if unset), then
    /// applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("GECO_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Loads from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Applies `GECO_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("GECO_DEVICE_ADDRESS") {
            self.device.address = address;
        }
        if let Some(port) = parse_var(&lookup, "GECO_DEVICE_PORT")? {
            self.device.port = port;
        }
        if let Some(mode) = lookup("GECO_MODE") {
            self.bus.mode = mode.parse().map_err(|e: String| {
                ConfigError::ValidationError(format!("GECO_MODE: {e}"))
            })?;
        }
        if let Some(interval) = parse_var(&lookup, "GECO_POLL_INTERVAL")? {
            self.polling.interval_secs = interval;
        }
        if let Some(timeout) = parse_var(&lookup, "GECO_RESPONSE_TIMEOUT_MS")? {
            self.polling.response_timeout_ms = timeout;
        }
        if let Some(retries) = parse_var(&lookup, "GECO_RETRIES")? {
            self.polling.retries = retries;
        }
        if let Some(id) = parse_var(&lookup, "GECO_CONTROLLER_HARD_ID")? {
            self.bus.controller.hard_id = id;
        }
        if let Some(id) = parse_var(&lookup, "GECO_CONTROLLER_SOFT_ID")? {
            self.bus.controller.soft_id = id;
        }
        if let Some(id) = parse_var(&lookup, "GECO_DEVICE_HARD_ID")? {
            self.bus.device.hard_id = id;
        }
        if let Some(id) = parse_var(&lookup, "GECO_DEVICE_SOFT_ID")? {
            self.bus.device.soft_id = id;
        }
        Ok(())
    }

    /// Saves to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, contents).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "device.address must not be empty".to_string(),
            ));
        }
        if self.device.port == 0 {
            return Err(ConfigError::ValidationError(
                "device.port must be non-zero".to_string(),
            ));
        }
        if !POLL_INTERVAL_RANGE.contains(&self.polling.interval_secs) {
            return Err(ConfigError::ValidationError(format!(
                "polling.interval_secs must be between {} and {} (got {})",
                POLL_INTERVAL_RANGE.start(),
                POLL_INTERVAL_RANGE.end(),
                self.polling.interval_secs
            )));
        }
        if self.polling.response_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "polling.response_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.bus.controller == self.bus.device {
            return Err(ConfigError::ValidationError(
                "bus.controller and bus.device must have different addresses".to_string(),
            ));
        }
        if self.reconnect.initial_backoff_secs == 0
            || self.reconnect.initial_backoff_secs > self.reconnect.max_backoff_secs
        {
            return Err(ConfigError::ValidationError(
                "reconnect.initial_backoff_secs must be non-zero and not above max_backoff_secs"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_secs)
    }

    /// Client settings for this configuration.
    pub fn client_config(&self) -> ClientConfig {
        let backoff = BackoffPolicy::new(
            Duration::from_secs(self.reconnect.initial_backoff_secs),
            Duration::from_secs(self.reconnect.max_backoff_secs),
        );
        ClientConfig::default()
            .with_endpoints(self.bus.controller.endpoint(), self.bus.device.endpoint())
            .with_mode(self.bus.mode)
            .with_response_timeout(Duration::from_millis(self.polling.response_timeout_ms))
            .with_retries(self.polling.retries)
            .with_cache_max_age(Duration::from_secs(self.polling.cache_max_age_secs))
            .with_transport(TransportConfig::default().with_backoff(backoff))
    }

    /// Connector for the configured adapter.
    pub fn connector(&self) -> TcpConnector {
        TcpConnector::new(self.device.address.clone(), self.device.port)
            .with_connect_timeout(Duration::from_secs(self.device.connect_timeout_secs))
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::ValidationError(format!("{key}: invalid value '{raw}'"))),
        None => Ok(None),
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file {:?}: {}", path, e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file {:?}: {}", path, e)
            }
            ConfigError::ValidationError(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(_, e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.device.address, "192.168.1.100");
        assert_eq!(config.device.port, 8899);
        assert_eq!(config.bus.mode, BusMode::Direct);
        assert_eq!(config.polling.interval_secs, 30);
        assert!(config.validate().is_ok());

        let client = config.client_config();
        assert_eq!(client.controller, Endpoint::new(1, 1));
        assert_eq!(client.device, Endpoint::new(2, 2));
        assert_eq!(client.response_timeout, Duration::from_secs(5));
        assert_eq!(client.retries, 2);
        assert_eq!(config.connector().addr(), "192.168.1.100:8899");
    }

    #[test]
    fn test_yaml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gecod.yaml");
        std::fs::write(
            &path,
            "device:\n  address: 10.0.0.7\nbus:\n  mode: eavesdrop\npolling:\n  interval_secs: 60\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.device.address, "10.0.0.7");
        // Unset fields keep their defaults.
        assert_eq!(config.device.port, 8899);
        assert_eq!(config.bus.mode, BusMode::Eavesdrop);
        assert_eq!(config.polling.interval_secs, 60);
        assert_eq!(config.polling.retries, 2);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved.yaml");

        let mut config = Config::default();
        config.bus.device.soft_id = 9;
        config.save(&path).unwrap();

        let reloaded = Config::from_file(&path).unwrap();
        assert_eq!(reloaded.bus.device.soft_id, 9);
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Config::from_file(dir.path().join("absent.yaml")),
            Err(ConfigError::IoError(..))
        ));

        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "bus:\n  mode: master\n").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::ParseError(..))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                ("GECO_DEVICE_ADDRESS", "adapter.local"),
                ("GECO_DEVICE_PORT", "502"),
                ("GECO_MODE", "eavesdrop"),
                ("GECO_POLL_INTERVAL", "15"),
                ("GECO_DEVICE_SOFT_ID", "4"),
                ("GECO_RETRIES", "0"),
            ]))
            .unwrap();

        assert_eq!(config.device.address, "adapter.local");
        assert_eq!(config.device.port, 502);
        assert_eq!(config.bus.mode, BusMode::Eavesdrop);
        assert_eq!(config.polling.interval_secs, 15);
        assert_eq!(config.bus.device, AddressConfig { hard_id: 2, soft_id: 4 });
        assert_eq!(config.polling.retries, 0);
    }

    #[test]
    fn test_bad_env_values() {
        let mut config = Config::default();
        assert!(config
            .apply_overrides(env(&[("GECO_DEVICE_PORT", "eighty")]))
            .is_err());
        assert!(config.apply_overrides(env(&[("GECO_MODE", "master")])).is_err());
        assert!(config
            .apply_overrides(env(&[("GECO_DEVICE_HARD_ID", "256")]))
            .is_err());
    }

    #[test]
    fn test_poll_interval_bounds() {
        let mut config = Config::default();
        for (interval, ok) in [(4, false), (5, true), (300, true), (301, false)] {
            config.polling.interval_secs = interval;
            assert_eq!(config.validate().is_ok(), ok, "interval {interval}");
        }
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.bus.device = config.bus.controller;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.device.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reconnect.initial_backoff_secs = 120;
        assert!(config.validate().is_err());
    }
}
