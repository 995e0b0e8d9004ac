//! Error types for Parley negotiation and signaling

/// Result type alias using Parley Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating a peer session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling channel or protocol error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Role assignment missing or violated
    #[error("Role error: {0}")]
    RoleError(String),

    /// SDP negotiation error (create/set description)
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Camera, microphone or display capture unavailable
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    /// Operation not allowed in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Signaling channel closed underneath the session
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable on the next negotiation trigger
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SdpError(_) | Error::IceCandidateError(_) | Error::WebRtcError(_)
        )
    }

    /// Check if this error came out of offer/answer/candidate handling
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            Error::SdpError(_) | Error::IceCandidateError(_) | Error::InvalidState(_)
        )
    }

    /// Check if this error means the session can no longer continue
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::ChannelClosed(_) | Error::RoleError(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::SdpError("bad offer".to_string());
        assert_eq!(err.to_string(), "SDP negotiation error: bad offer");
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::SdpError("x".to_string()).is_retryable());
        assert!(!Error::MediaUnavailable("x".to_string()).is_retryable());
        assert!(!Error::ChannelClosed("x".to_string()).is_retryable());
    }

    #[test]
    fn test_error_is_terminal() {
        assert!(Error::ChannelClosed("socket".to_string()).is_terminal());
        assert!(!Error::IceCandidateError("x".to_string()).is_terminal());
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err = Error::from(parse_err);
        assert!(matches!(err, Error::SerializationError(_)));
    }
}
