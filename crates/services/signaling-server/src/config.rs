//! Relay configuration

use parley_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on (default: 0.0.0.0:8080)
    pub bind_address: String,

    /// WebSocket path rooms are served on (default: /signal)
    pub path: String,

    /// Room joined when the URL carries no `room` parameter
    pub default_room: String,

    /// Peers allowed per room; `None` means unbounded (default: 2)
    pub room_capacity: Option<usize>,

    /// Frames queued per connection before the relay waits on it (default: 128)
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            path: "/signal".to_string(),
            default_room: "default".to_string(),
            room_capacity: Some(2),
            outbound_buffer: 128,
        }
    }
}

impl ServerConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `bind_address` is not a socket address
    /// - `path` does not start with `/`
    /// - `default_room` is blank
    /// - `room_capacity` or `outbound_buffer` is zero
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if !self.path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "path must start with '/', got {}",
                self.path
            )));
        }

        if self.default_room.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "default_room must not be empty".to_string(),
            ));
        }

        if self.room_capacity == Some(0) {
            return Err(Error::InvalidConfig(
                "room_capacity must be at least 1".to_string(),
            ));
        }

        if self.outbound_buffer == 0 {
            return Err(Error::InvalidConfig(
                "outbound_buffer must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Parsed `bind_address`
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_address.parse().map_err(|e| {
            Error::InvalidConfig(format!(
                "bind_address {} is not a socket address: {}",
                self.bind_address, e
            ))
        })
    }

    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.bind_address = bind_address.into();
        self
    }

    pub fn with_room_capacity(mut self, room_capacity: Option<usize>) -> Self {
        self.room_capacity = room_capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.room_capacity, Some(2));
        assert_eq!(config.path, "/signal");
    }

    #[test]
    fn test_bad_bind_address() {
        let config = ServerConfig::default().with_bind_address("localhost");
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = ServerConfig::default().with_room_capacity(Some(0));
        assert!(config.validate().is_err());

        let unbounded = ServerConfig::default().with_room_capacity(None);
        assert!(unbounded.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"bind_address":"127.0.0.1:9000"}"#).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.default_room, "default");
    }
}
