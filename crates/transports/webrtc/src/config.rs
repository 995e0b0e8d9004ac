//! Configuration types for joining a room

use parley_core::{Error, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Public STUN servers used when none are configured
pub const DEFAULT_STUN_SERVERS: [&str; 4] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
    "stun:stun3.l.google.com:19302",
];

/// Path the relay serves rooms on
pub const SIGNAL_PATH: &str = "/signal";

/// Client configuration for one call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Relay base URL (ws:// or wss://); the room path is appended
    pub signaling_url: String,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Candidates gathered before an offer is made (default: 10)
    pub ice_candidate_pool_size: u8,

    /// Depth of the session event queue (default: 128)
    pub event_buffer: usize,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".to_string(),
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            turn_servers: Vec::new(),
            ice_candidate_pool_size: 10,
            event_buffer: 128,
        }
    }
}

impl CallConfig {
    /// Configuration pointing at `signaling_url` with default ICE servers
    pub fn new(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            ..Default::default()
        }
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a ws:// or wss:// URL
    /// - a STUN or TURN URL has the wrong scheme
    /// - `event_buffer` is zero
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.signaling_url).map_err(|e| {
            Error::InvalidConfig(format!(
                "signaling_url {} is not a valid URL: {}",
                self.signaling_url, e
            ))
        })?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if let Some(bad) = self
            .stun_servers
            .iter()
            .find(|s| !s.starts_with("stun:") && !s.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "STUN server must start with stun: or stuns:, got {}",
                bad
            )));
        }

        if let Some(bad) = self
            .turn_servers
            .iter()
            .find(|t| !t.url.starts_with("turn:") && !t.url.starts_with("turns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "TURN server must start with turn: or turns:, got {}",
                bad.url
            )));
        }

        if self.event_buffer == 0 {
            return Err(Error::InvalidConfig(
                "event_buffer must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Add TURN servers to this configuration
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Replace the STUN server list
    pub fn with_stun_servers(mut self, stun_servers: Vec<String>) -> Self {
        self.stun_servers = stun_servers;
        self
    }

    /// Disable ICE servers entirely (host candidates only)
    pub fn without_ice_servers(mut self) -> Self {
        self.stun_servers.clear();
        self.turn_servers.clear();
        self
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }

    /// WebSocket URL for `room`: `<signaling_url>/signal?room=<room>`
    pub fn signal_url(&self, room: &str) -> Result<Url> {
        let room = room.trim();
        if room.is_empty() {
            return Err(Error::InvalidConfig("room id must not be empty".to_string()));
        }

        let mut url = Url::parse(&self.signaling_url).map_err(|e| {
            Error::InvalidConfig(format!("invalid signaling_url: {}", e))
        })?;
        url.set_path(SIGNAL_PATH);
        url.query_pairs_mut().clear().append_pair("room", room);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stun_servers.len(), 4);
        assert_eq!(config.ice_candidate_pool_size, 10);
    }

    #[test]
    fn test_invalid_scheme() {
        let config = CallConfig::new("http://localhost:8080");
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_turn_url() {
        let config = CallConfig::default().with_turn_servers(vec![TurnServerConfig {
            url: "stun:wrong.example.com".to_string(),
            username: "user".to_string(),
            credential: "pass".to_string(),
        }]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_signal_url() {
        let config = CallConfig::new("wss://calls.example.com");
        let url = config.signal_url("team standup").unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/signal");
        assert_eq!(url.query(), Some("room=team+standup"));
    }

    #[test]
    fn test_empty_room_rejected() {
        let config = CallConfig::default();
        assert!(config.signal_url("   ").is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: CallConfig =
            serde_json::from_str(r#"{"signaling_url": "ws://127.0.0.1:9000"}"#).unwrap();
        assert_eq!(config.signaling_url, "ws://127.0.0.1:9000");
        assert_eq!(config.event_buffer, 128);
    }
}
