//! Config and session files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use flowstate_audio::EngineConfig;
use flowstate_core::SessionState;
use tracing::{debug, info, warn};

/// Where the player keeps its files.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_file: PathBuf,
    pub session_file: PathBuf,
}

impl AppPaths {
    /// Resolve the platform directories, with an optional config file override.
    pub fn resolve(config_override: Option<PathBuf>) -> Result<Self> {
        let dirs = ProjectDirs::from("com", "flowstate", "FlowState")
            .context("Failed to determine config directory")?;
        Ok(Self {
            config_file: config_override.unwrap_or_else(|| dirs.config_dir().join("config.json")),
            session_file: dirs.data_dir().join("session.json"),
        })
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self {
            config_file: dir.join("config.json"),
            session_file: dir.join("session.json"),
        }
    }
}

/// Read the engine config. Missing or malformed files give defaults.
pub fn load_config(path: &Path) -> EngineConfig {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            debug!("No config at {} ({e}), using defaults", path.display());
            return EngineConfig::default();
        }
    };
    match serde_json::from_str::<EngineConfig>(&text) {
        Ok(config) => match config.validate() {
            Ok(()) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring invalid config {}: {e}", path.display());
                EngineConfig::default()
            }
        },
        Err(e) => {
            warn!("Ignoring malformed config {}: {e}", path.display());
            EngineConfig::default()
        }
    }
}

pub fn load_session(path: &Path) -> Option<SessionState> {
    let text = fs::read_to_string(path).ok()?;
    match SessionState::from_json(&text) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!("Discarding unreadable session {}: {e}", path.display());
            None
        }
    }
}

pub fn save_session(path: &Path, session: &SessionState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = session.to_json()?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!("Saved session to {}", path.display());
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flowstate_core::RepeatMode;

    #[test]
    fn test_missing_config_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::in_dir(dir.path());
        assert_eq!(load_config(&paths.config_file), EngineConfig::default());
    }

    #[test]
    fn test_malformed_config_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::in_dir(dir.path());
        fs::write(&paths.config_file, "{ block_size: ").unwrap();
        assert_eq!(load_config(&paths.config_file), EngineConfig::default());

        fs::write(&paths.config_file, r#"{ "queue_capacity": 0 }"#).unwrap();
        assert_eq!(load_config(&paths.config_file), EngineConfig::default());
    }

    #[test]
    fn test_partial_config_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::in_dir(dir.path());
        fs::write(&paths.config_file, r#"{ "block_size": 256 }"#).unwrap();
        let config = load_config(&paths.config_file);
        assert_eq!(config.block_size, 256);
        assert_eq!(config.queue_capacity, EngineConfig::default().queue_capacity);
    }

    #[test]
    fn test_session_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let session = SessionState {
            playlist: vec![PathBuf::from("/music/a.flac")],
            current_index: Some(0),
            position_secs: 12.5,
            volume: 0.4,
            muted: true,
            shuffle: false,
            repeat: RepeatMode::One,
        };
        save_session(&path, &session).unwrap();
        assert_eq!(load_session(&path), Some(session));
    }

    #[test]
    fn test_corrupt_session_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "not json").unwrap();
        assert_eq!(load_session(&path), None);
    }
}
