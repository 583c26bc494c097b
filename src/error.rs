//! Failure kinds of the live-detection subsystem.
//!
//! None of these are fatal to the application. Each call site narrows
//! functionality locally: discovery degrades to an empty camera list, a failed
//! one-shot detection keeps the previous overlay, a malformed stream message is
//! dropped, and a transport failure ends the streaming session.

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, LiveDetectError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LiveDetectError {
    /// Registry unreachable or answered with a non-success status.
    #[error("camera registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Registry answered 2xx but the payload has the wrong shape.
    #[error("camera registry returned a malformed response: {0}")]
    RegistryMalformedResponse(String),

    /// Single-shot detection failed (capture, transport, status or payload).
    #[error("detection service unavailable: {0}")]
    DetectionUnavailable(String),

    /// Native frame size not known yet (metadata not loaded).
    #[error("native frame size unknown")]
    SizeUnknown,

    /// Streaming connection could not be opened or broke.
    #[error("detection session transport error: {0}")]
    SessionTransportError(String),

    /// A streaming message failed to parse or validate.
    #[error("malformed detection stream message: {0}")]
    MalformedStreamMessage(String),

    /// Latitude/longitude outside the valid range.
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),
}

impl LiveDetectError {
    /// Short stable name, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            LiveDetectError::RegistryUnavailable(_) => "RegistryUnavailable",
            LiveDetectError::RegistryMalformedResponse(_) => "RegistryMalformedResponse",
            LiveDetectError::DetectionUnavailable(_) => "DetectionUnavailable",
            LiveDetectError::SizeUnknown => "SizeUnknown",
            LiveDetectError::SessionTransportError(_) => "SessionTransportError",
            LiveDetectError::MalformedStreamMessage(_) => "MalformedStreamMessage",
            LiveDetectError::InvalidCoordinate(_) => "InvalidCoordinate",
        }
    }
}
