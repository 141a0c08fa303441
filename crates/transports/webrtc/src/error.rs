//! Error types for the signaling relay

/// Result type alias using relay Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while relaying a session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling transport failure (read, write or upgrade)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed signaling message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    Sdp(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// Media relay read/write failure
    #[error("Relay error: {0}")]
    Relay(String),

    /// Pub/sub publish failure
    #[error("Publish error: {0}")]
    Publish(String),

    /// Frame decoding failure
    #[error("Decode error: {0}")]
    Decode(String),

    /// A session with this id is already registered
    #[error("Session already registered: {0}")]
    SessionExists(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Transport errors are fatal to the owning session and never retried
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Protocol(_) | Error::Io(_))
    }

    /// Negotiation errors drop the triggering message but keep the session open
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            Error::Sdp(_) | Error::IceCandidate(_) | Error::WebRtc(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
