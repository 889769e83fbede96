// Error handling for the playback session engine

use std::fmt;

/// Playback error types
#[derive(Debug, Clone)]
pub enum PlayerError {
    /// Failed to initialize an audio output path
    InitializationError(String),

    /// Failed to fetch or open the streamed resource
    LoadError(String),

    /// Playback error
    PlaybackError(String),

    /// Invalid session state transition
    InvalidState(String),

    /// Audio format not supported
    UnsupportedFormat(String),

    /// Device error (no output device, stream build failure)
    DeviceError(String),

    /// IO error
    IoError(String),

    /// Decoding error
    DecodingError(String),

    /// Network error (download/streaming)
    NetworkError(String),
}

impl fmt::Display for PlayerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PlayerError::InitializationError(msg) => write!(f, "Initialization error: {}", msg),
            PlayerError::LoadError(msg) => write!(f, "Load error: {}", msg),
            PlayerError::PlaybackError(msg) => write!(f, "Playback error: {}", msg),
            PlayerError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            PlayerError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {}", msg),
            PlayerError::DeviceError(msg) => write!(f, "Device error: {}", msg),
            PlayerError::IoError(msg) => write!(f, "IO error: {}", msg),
            PlayerError::DecodingError(msg) => write!(f, "Decoding error: {}", msg),
            PlayerError::NetworkError(msg) => write!(f, "Network error: {}", msg),
        }
    }
}

impl std::error::Error for PlayerError {}

/// Result type alias for playback operations
pub type Result<T> = std::result::Result<T, PlayerError>;

impl From<std::io::Error> for PlayerError {
    fn from(err: std::io::Error) -> Self {
        PlayerError::IoError(err.to_string())
    }
}
