//! Error types for the voice controller.

use thiserror::Error;

/// Result alias using the controller [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a voice session.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone capture error (device lost, stream failure).
    #[error("capture error: {0}")]
    Capture(String),

    /// Streaming recognition transport error.
    #[error("streaming error: {0}")]
    Streaming(String),

    /// Speech-to-text error.
    #[error("transcription error: {0}")]
    Transcribe(String),

    /// Text-to-speech error.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Dialogue policy service error.
    #[error("dialogue error: {0}")]
    Dialogue(String),

    /// Microphone access denied by the OS or the recognition service.
    /// Fatal for the session; never retried.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The session was stopped while an operation was in flight.
    #[error("session stopped")]
    Stopped,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl Error {
    /// Whether the session must end rather than retry.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::PermissionDenied(_) | Self::Stopped)
    }
}
