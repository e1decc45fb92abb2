//! Error types for the live audio session

use std::fmt;

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Device closed")]
    Closed,
}

/// PCM codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("PCM payload has odd length: {0} bytes")]
    OddLength(usize),

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),
}

/// Bidirectional channel errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Channel closed before it was opened")]
    ClosedBeforeOpen,

    #[error("Timed out waiting for the channel to open")]
    Timeout,
}

/// Resource a session attempts to acquire before it can become active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Microphone,
    PlaybackDevice,
    Channel,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Microphone => f.write_str("microphone"),
            Resource::PlaybackDevice => f.write_str("playback device"),
            Resource::Channel => f.write_str("channel"),
        }
    }
}

/// Failures surfaced at the session boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Failed to acquire {resource}: {reason}")]
    Acquisition { resource: Resource, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A device that was acquired stopped working mid-session
    #[error("{resource} failed: {reason}")]
    Device { resource: Resource, reason: String },
}

impl SessionError {
    pub fn acquisition(resource: Resource, reason: impl fmt::Display) -> Self {
        SessionError::Acquisition {
            resource,
            reason: reason.to_string(),
        }
    }

    pub fn device(resource: Resource, reason: impl fmt::Display) -> Self {
        SessionError::Device {
            resource,
            reason: reason.to_string(),
        }
    }

    /// True when the session never became active
    pub fn is_acquisition(&self) -> bool {
        matches!(self, SessionError::Acquisition { .. })
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
