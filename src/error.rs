//! Error types for the Jarvis voice assistant

use thiserror::Error;

/// Result type alias for Jarvis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error (capture or playback)
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Response generator error
    #[error("agent error: {0}")]
    Agent(String),

    /// Turn engine is gone
    #[error("turn engine error: {0}")]
    Engine(String),

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

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
}

impl Error {
    /// Whether the error is a transport fault worth reconnecting over
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::WebSocket(_) | Self::Http(_) | Self::Stt(_) | Self::Io(_))
    }
}
