//! Persisted playback session.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::RepeatMode;

/// Everything needed to resume where the user left off.
///
/// The engine only produces and consumes this value; where it is stored is
/// up to the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionState {
    /// Playlist file paths in natural order.
    pub playlist: Vec<PathBuf>,
    /// Index of the current entry.
    pub current_index: Option<usize>,
    /// Position within the current entry in seconds.
    pub position_secs: f64,
    /// Output volume (0.0 to 1.0).
    pub volume: f32,
    /// Whether output is muted.
    pub muted: bool,
    /// Shuffle enabled.
    pub shuffle: bool,
    /// Repeat mode.
    pub repeat: RepeatMode,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            playlist: Vec::new(),
            current_index: None,
            position_secs: 0.0,
            volume: 0.7,
            muted: false,
            shuffle: false,
            repeat: RepeatMode::Off,
        }
    }
}

impl SessionState {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used, clippy::float_cmp)]
    fn test_missing_fields_use_defaults() {
        let state = SessionState::from_json(r#"{ "playlist": ["a.flac"], "repeat": "all" }"#).unwrap();
        assert_eq!(state.playlist, vec![PathBuf::from("a.flac")]);
        assert_eq!(state.repeat, RepeatMode::All);
        assert_eq!(state.volume, 0.7);
        assert!(!state.muted);
    }
}
