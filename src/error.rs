//! Error types for the voice tutor

use thiserror::Error;

/// Result type alias for voice tutor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice tutor
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The runtime has no speech capture capability
    #[error("speech capture unsupported: {0}")]
    Capability(String),

    /// Speech capture attempt failed
    #[error("capture error: {0}")]
    Capture(String),

    /// Backend request failed or returned an unusable payload
    #[error("network error: {0}")]
    Network(String),

    /// Audio resource could not be played
    #[error("playback error: {0}")]
    Playback(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Operation did not complete in time
    #[error("timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
