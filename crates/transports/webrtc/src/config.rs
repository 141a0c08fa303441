//! Configuration types for the signaling relay

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Smallest relay buffer that still fits a full-MTU RTP packet
pub const MIN_RELAY_BUFFER_SIZE: usize = 1500;

/// Default pub/sub topic for sampled frames
pub const DEFAULT_FRAME_TOPIC: &str = "video-frames";

/// Main configuration for the relay server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address the HTTP/WebSocket listener binds to
    pub listen_addr: SocketAddr,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Pub/sub bus URL; `None` disables frame sampling
    pub redis_url: Option<String>,

    /// Upper bound for connecting to the bus and for each command sent to
    /// it, in milliseconds (default: 2000)
    pub redis_timeout_ms: u64,

    /// Topic sampled frames are published under (default: video-frames)
    pub frame_topic: String,

    /// Frame sampling interval in milliseconds (default: 5000)
    pub sample_interval_ms: u64,

    /// Seconds a session may spend negotiating before it is reclaimed
    /// (default: 30, 0 disables the timeout)
    pub negotiation_timeout_secs: u64,

    /// Per-packet read buffer for media relay tasks (default: 1500)
    pub relay_buffer_size: usize,

    /// Capacity of the per-session outbound signaling queue (default: 128)
    pub outbound_queue_size: usize,

    /// How long teardown waits for relay and sampler tasks (default: 1000ms)
    pub teardown_grace_ms: u64,
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

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            redis_url: Some("redis://localhost:6379".to_string()),
            redis_timeout_ms: 2000,
            frame_topic: DEFAULT_FRAME_TOPIC.to_string(),
            sample_interval_ms: 5000,
            negotiation_timeout_secs: 30,
            relay_buffer_size: MIN_RELAY_BUFFER_SIZE,
            outbound_queue_size: 128,
            teardown_grace_ms: 1000,
        }
    }
}

impl RelayConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stun_servers` is empty or contains a non-STUN URL
    /// - a TURN server URL does not start with turn: or turns:
    /// - `relay_buffer_size` is smaller than 1500 bytes
    /// - `sample_interval_ms`, `redis_timeout_ms` or `outbound_queue_size` is zero
    /// - `frame_topic` is empty
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if let Some(url) = self
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "STUN server must start with stun: or stuns:, got {}",
                url
            )));
        }

        if let Some(turn) = self
            .turn_servers
            .iter()
            .find(|turn| !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "TURN server must start with turn: or turns:, got {}",
                turn.url
            )));
        }

        if self.relay_buffer_size < MIN_RELAY_BUFFER_SIZE {
            return Err(Error::InvalidConfig(format!(
                "relay_buffer_size must be at least {}, got {}",
                MIN_RELAY_BUFFER_SIZE, self.relay_buffer_size
            )));
        }

        if self.sample_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "sample_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.redis_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "redis_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.outbound_queue_size == 0 {
            return Err(Error::InvalidConfig(
                "outbound_queue_size must be greater than 0".to_string(),
            ));
        }

        if self.frame_topic.is_empty() {
            return Err(Error::InvalidConfig("frame_topic cannot be empty".to_string()));
        }

        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }

    /// `None` when the timeout is disabled
    pub fn negotiation_timeout(&self) -> Option<Duration> {
        (self.negotiation_timeout_secs > 0)
            .then(|| Duration::from_secs(self.negotiation_timeout_secs))
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }
}
