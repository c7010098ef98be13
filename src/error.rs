//! Error types for the lip-sync subsystem.

/// Top-level error type for avatar lip-sync.
#[derive(Debug, thiserror::Error)]
pub enum LipSyncError {
    /// Audio device or output stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Chunk payload could not be parsed or decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A bounded wait (chunk load) expired.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Malformed control channel message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Control channel transport failure (connect, read, write).
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, LipSyncError>;
