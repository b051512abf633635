use std::str::FromStr;
use std::time::Duration;

use netsync_core::VariableLimits;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Configuration for a session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Relay server `host:port` (`NETSYNC_SERVER`).
    pub server_addr: String,
    /// Room to join (`NETSYNC_ROOM`).
    pub room_id: String,
    /// Stable identifier of this device (`NETSYNC_DEVICE_ID`, random by default).
    pub device_id: String,
    /// Limit for TCP connect and for the server's Welcome.
    pub connect_timeout: Duration,
    /// Heartbeat period; must stay well below the server's heartbeat timeout.
    pub ping_interval: Duration,
    /// Outgoing transform updates per second (`NETSYNC_SEND_RATE`); 0 disables.
    pub transform_send_rate_hz: f32,
    /// How far in the past remote transforms are rendered.
    pub interpolation_delay: Duration,
    pub limits: VariableLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:5555".to_string(),
            room_id: "default".to_string(),
            device_id: Uuid::new_v4().to_string(),
            connect_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(1),
            transform_send_rate_hz: 10.0,
            interpolation_delay: Duration::from_millis(100),
            limits: VariableLimits::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from defaults plus whatever `lookup` returns for each known key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(addr) = lookup("NETSYNC_SERVER").filter(|v| !v.trim().is_empty()) {
            config.server_addr = addr.trim().to_string();
        }
        if let Some(room) = lookup("NETSYNC_ROOM").filter(|v| !v.trim().is_empty()) {
            config.room_id = room.trim().to_string();
        }
        if let Some(device) = lookup("NETSYNC_DEVICE_ID").filter(|v| !v.trim().is_empty()) {
            config.device_id = device.trim().to_string();
        }
        if let Some(rate) = parse_key::<f32>(&lookup, "NETSYNC_SEND_RATE")? {
            if !rate.is_finite() || rate < 0.0 {
                return Err(ConfigError::Invalid {
                    key: "NETSYNC_SEND_RATE",
                    value: rate.to_string(),
                });
            }
            config.transform_send_rate_hz = rate;
        }
        Ok(config)
    }

    /// Builder-style room override.
    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = room_id.into();
        self
    }

    /// Builder-style server override.
    pub fn with_server(mut self, server_addr: impl Into<String>) -> Self {
        self.server_addr = server_addr.into();
        self
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
