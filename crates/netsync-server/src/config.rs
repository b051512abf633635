use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use netsync_core::VariableLimits;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Server settings. Every field can be overridden from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP address for session traffic (`NETSYNC_BIND`).
    pub bind_addr: SocketAddr,
    /// HTTP inspector address (`NETSYNC_HTTP_BIND`).
    pub http_addr: SocketAddr,
    /// Clients allowed in one room (`NETSYNC_MAX_CLIENTS`).
    pub max_clients_per_room: u32,
    /// Time allowed between accept and `Hello`.
    pub handshake_timeout: Duration,
    /// A client silent for this long is dropped (`NETSYNC_HEARTBEAT_SECS`).
    pub heartbeat_timeout: Duration,
    pub limits: VariableLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5555)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 5556)),
            max_clients_per_room: 64,
            handshake_timeout: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(10),
            limits: VariableLimits::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from defaults plus whatever `lookup` returns for each known key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(addr) = parse_key(&lookup, "NETSYNC_BIND")? {
            config.bind_addr = addr;
        }
        if let Some(addr) = parse_key(&lookup, "NETSYNC_HTTP_BIND")? {
            config.http_addr = addr;
        }
        if let Some(max) = parse_key(&lookup, "NETSYNC_MAX_CLIENTS")? {
            config.max_clients_per_room = max;
        }
        if let Some(secs) = parse_key::<u64>(&lookup, "NETSYNC_HEARTBEAT_SECS")? {
            config.heartbeat_timeout = Duration::from_secs(secs.max(1));
        }
        Ok(config)
    }
}

fn parse_key<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
