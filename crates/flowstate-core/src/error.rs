//! Error types for Flow State.

use thiserror::Error;

/// Result type alias using Flow State's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Flow State.
#[derive(Error, Debug)]
pub enum Error {
    // Stream errors
    #[error("Failed to open audio stream: {0}")]
    Open(String),

    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("Seek failed: {0}")]
    Seek(String),

    // Output errors
    #[error("Audio device error: {0}")]
    Device(String),

    // Effects errors
    #[error("Effect '{effect}' failed: {reason}")]
    EffectProcessing { effect: String, reason: String },

    // Worker errors
    #[error("Producer did not stop within {timeout_ms} ms")]
    StopTimeout { timeout_ms: u64 },

    // Controller errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if this error should be surfaced to the user.
    ///
    /// Everything else is recovered inside the engine and only logged.
    pub const fn is_user_visible(&self) -> bool {
        matches!(self, Self::Open(_) | Self::Device(_))
    }

    /// Shorthand for an effect processing failure.
    pub fn effect(effect: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EffectProcessing {
            effect: effect.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_user_visible() {
        assert!(Error::Open("missing.flac".into()).is_user_visible());
        assert!(Error::Device("no output".into()).is_user_visible());
        assert!(!Error::Decode("corrupt frame".into()).is_user_visible());
        assert!(!Error::StopTimeout { timeout_ms: 2000 }.is_user_visible());
        assert!(!Error::effect("Gain", "bad block").is_user_visible());
    }

    #[test]
    fn test_error_display() {
        let err = Error::effect("Compressor", "non-finite output");
        assert_eq!(err.to_string(), "Effect 'Compressor' failed: non-finite output");
    }
}
