//! Error types for room session coordination

/// Result type alias using roomlink Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in room session operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling connection error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Peer not found in the registry
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Room-level rejection from the relay (room full, duplicate join)
    #[error("Room rejected: {0}")]
    RoomRejected(String),

    /// Session is in the wrong state for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Media capture device unavailable or permission denied
    #[error("Media access denied: {0}")]
    MediaAccessDenied(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    OperationTimeout(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingError(_)
                | Error::OperationTimeout(_)
                | Error::WebSocketError(_)
                | Error::IoError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error is a peer-related error
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::PeerNotFound(_)
                | Error::PeerConnectionError(_)
                | Error::IceCandidateError(_)
                | Error::SdpError(_)
        )
    }

    /// Check if this error relates to local media capture
    pub fn is_media_error(&self) -> bool {
        matches!(self, Error::MediaAccessDenied(_) | Error::MediaTrackError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::SignalingError("test".to_string()).is_retryable());
        assert!(Error::OperationTimeout("test".to_string()).is_retryable());
        assert!(!Error::InvalidConfig("test".to_string()).is_retryable());
        assert!(!Error::RoomRejected("room full".to_string()).is_retryable());
    }

    #[test]
    fn test_error_is_config_error() {
        assert!(Error::InvalidConfig("test".to_string()).is_config_error());
        assert!(!Error::SignalingError("test".to_string()).is_config_error());
    }

    #[test]
    fn test_error_is_peer_error() {
        assert!(Error::PeerNotFound("test".to_string()).is_peer_error());
        assert!(Error::PeerConnectionError("test".to_string()).is_peer_error());
        assert!(!Error::InvalidConfig("test".to_string()).is_peer_error());
    }

    #[test]
    fn test_error_is_media_error() {
        assert!(Error::MediaAccessDenied("no camera".to_string()).is_media_error());
        assert!(Error::MediaTrackError("test".to_string()).is_media_error());
        assert!(!Error::SdpError("test".to_string()).is_media_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::IoError(_)));
    }
}
