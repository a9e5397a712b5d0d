//! Named-action facade used by UI and remote-control modules.

use std::path::PathBuf;

use flowstate_core::{Error, RepeatMode, Result, StreamProperties};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::{PlaybackController, SyncTarget};

/// A playback request routed through the host.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackAction {
    Load { path: PathBuf },
    LoadAndPlay { path: PathBuf },
    Play { offset: Option<f64> },
    PlayIndex { index: usize },
    Pause,
    Resume,
    Stop,
    Next,
    Previous,
    Seek { position: f64 },
    SetVolume { level: f32 },
    ToggleMute,
    SetShuffleMode { enabled: bool },
    SetRepeatMode { mode: RepeatMode },
    ForceSyncPlayback {
        target: SyncTarget,
        position: f64,
        playing: bool,
    },
}

impl PlaybackAction {
    /// Build an action from its wire name and a JSON parameter object.
    pub fn from_name(name: &str, params: &Value) -> Result<Self> {
        let action = match name {
            "load" | "load_path" => Self::Load {
                path: path_param(params)?,
            },
            "load_and_play" | "load_and_play_path" => Self::LoadAndPlay {
                path: path_param(params)?,
            },
            "play" => Self::Play {
                offset: f64_opt(params, &["offset", "start_offset_sec"]).or_else(|| {
                    params
                        .get("play_args")
                        .and_then(|a| f64_opt(a, &["start_offset_sec"]))
                }),
            },
            "play_index" | "play_track_at_playlist_index" => Self::PlayIndex {
                index: usize::try_from(u64_req(params, &["index"])?)
                    .map_err(|_| Error::InvalidArgument("index out of range".into()))?,
            },
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "stop" => Self::Stop,
            "next" => Self::Next,
            "previous" => Self::Previous,
            "seek" => Self::Seek {
                position: f64_opt(params, &["position_seconds", "position"])
                    .ok_or_else(|| missing("position_seconds"))?,
            },
            "set_volume" => Self::SetVolume {
                level: f64_opt(params, &["level", "volume"]).ok_or_else(|| missing("level"))? as f32,
            },
            "toggle_mute" => Self::ToggleMute,
            "set_shuffle_mode" => Self::SetShuffleMode {
                enabled: bool_opt(params, &["state", "enabled"]).ok_or_else(|| missing("state"))?,
            },
            "set_repeat_mode" => Self::SetRepeatMode {
                mode: params
                    .get("mode")
                    .and_then(Value::as_str)
                    .unwrap_or("off")
                    .parse()?,
            },
            "force_sync_playback" => {
                let target = if let Some(id) = params.get("library_track_id").and_then(Value::as_i64) {
                    SyncTarget::LibraryId(id)
                } else {
                    let index = u64_req(params, &["index"])?;
                    SyncTarget::Index(
                        usize::try_from(index)
                            .map_err(|_| Error::InvalidArgument("index out of range".into()))?,
                    )
                };
                Self::ForceSyncPlayback {
                    target,
                    position: f64_opt(params, &["position_seconds", "position"]).unwrap_or(0.0),
                    playing: bool_opt(params, &["is_playing_target", "playing"]).unwrap_or(true),
                }
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "Unknown playback action: {other}"
                )))
            }
        };
        Ok(action)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Load { .. } => "load",
            Self::LoadAndPlay { .. } => "load_and_play",
            Self::Play { .. } => "play",
            Self::PlayIndex { .. } => "play_index",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Next => "next",
            Self::Previous => "previous",
            Self::Seek { .. } => "seek",
            Self::SetVolume { .. } => "set_volume",
            Self::ToggleMute => "toggle_mute",
            Self::SetShuffleMode { .. } => "set_shuffle_mode",
            Self::SetRepeatMode { .. } => "set_repeat_mode",
            Self::ForceSyncPlayback { .. } => "force_sync_playback",
        }
    }
}

fn missing(name: &str) -> Error {
    Error::InvalidArgument(format!("missing parameter '{name}'"))
}

fn path_param(params: &Value) -> Result<PathBuf> {
    ["filepath", "path"]
        .iter()
        .find_map(|k| params.get(k).and_then(Value::as_str))
        .map(PathBuf::from)
        .ok_or_else(|| missing("filepath"))
}

fn f64_opt(params: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| params.get(k).and_then(Value::as_f64))
}

fn u64_req(params: &Value, keys: &[&str]) -> Result<u64> {
    keys.iter()
        .find_map(|k| params.get(k).and_then(Value::as_u64))
        .ok_or_else(|| missing(keys[0]))
}

fn bool_opt(params: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| params.get(k).and_then(Value::as_bool))
}

/// Result of a host request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl ActionOutcome {
    pub const fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl From<Result<()>> for ActionOutcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::failed(e),
        }
    }
}

/// Owns the controller and dispatches named actions to it.
pub struct Host {
    controller: PlaybackController,
}

impl Host {
    pub const fn new(controller: PlaybackController) -> Self {
        Self { controller }
    }

    pub const fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut PlaybackController {
        &mut self.controller
    }

    pub fn into_controller(self) -> PlaybackController {
        self.controller
    }

    /// Stream properties of the loaded track, or of the effects chain when idle.
    pub fn get_audio_properties(&self) -> StreamProperties {
        self.controller
            .properties()
            .unwrap_or_else(|| self.controller.chain().lock().stream_properties())
    }

    pub fn request_playback_action(&mut self, action: PlaybackAction) -> ActionOutcome {
        debug!("Playback action: {}", action.name());
        let c = &mut self.controller;
        let result = match action {
            PlaybackAction::Load { path } => c.load(path).map(|_| ()),
            PlaybackAction::LoadAndPlay { path } => c.load_and_play(path),
            PlaybackAction::Play { offset } => c.play(offset),
            PlaybackAction::PlayIndex { index } => c.play_index(index),
            PlaybackAction::Pause => c.pause(),
            PlaybackAction::Resume => c.resume(),
            PlaybackAction::Stop => c.stop(),
            PlaybackAction::Next => c.next(),
            PlaybackAction::Previous => c.previous(),
            PlaybackAction::Seek { position } => c.seek(position),
            PlaybackAction::SetVolume { level } => {
                c.set_volume(level);
                Ok(())
            }
            PlaybackAction::ToggleMute => {
                c.toggle_mute();
                Ok(())
            }
            PlaybackAction::SetShuffleMode { enabled } => {
                c.set_shuffle(enabled);
                Ok(())
            }
            PlaybackAction::SetRepeatMode { mode } => {
                c.set_repeat_mode(mode);
                Ok(())
            }
            PlaybackAction::ForceSyncPlayback {
                target,
                position,
                playing,
            } => c.force_sync_playback(target, position, playing),
        };
        if let Err(e) = &result {
            warn!("Playback action failed: {e}");
        }
        result.into()
    }

    /// Parse and dispatch a named action.
    pub fn request_named_action(&mut self, name: &str, params: &Value) -> ActionOutcome {
        match PlaybackAction::from_name(name, params) {
            Ok(action) => self.request_playback_action(action),
            Err(e) => {
                warn!("{e}");
                ActionOutcome::failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::EffectsChain;
    use crate::config::EngineConfig;
    use crate::output::ManualDevice;
    use serde_json::json;

    fn host() -> Host {
        let controller = PlaybackController::new(
            EngineConfig::default(),
            Box::new(ManualDevice::new()),
            EffectsChain::new(StreamProperties::default()),
        )
        .unwrap();
        Host::new(controller)
    }

    #[test]
    fn test_parse_actions_with_original_parameter_names() {
        assert_eq!(
            PlaybackAction::from_name("load_and_play_path", &json!({ "filepath": "/a.wav" })).unwrap(),
            PlaybackAction::LoadAndPlay {
                path: PathBuf::from("/a.wav")
            }
        );
        assert_eq!(
            PlaybackAction::from_name("set_volume", &json!({ "level": 0.25 })).unwrap(),
            PlaybackAction::SetVolume { level: 0.25 }
        );
        assert_eq!(
            PlaybackAction::from_name("play", &json!({ "play_args": { "start_offset_sec": 4.0 } })).unwrap(),
            PlaybackAction::Play { offset: Some(4.0) }
        );
        assert_eq!(
            PlaybackAction::from_name("set_repeat_mode", &json!({ "mode": "all" })).unwrap(),
            PlaybackAction::SetRepeatMode {
                mode: RepeatMode::All
            }
        );
        assert_eq!(
            PlaybackAction::from_name(
                "force_sync_playback",
                &json!({ "library_track_id": 7, "position_seconds": 12.0, "is_playing_target": false })
            )
            .unwrap(),
            PlaybackAction::ForceSyncPlayback {
                target: SyncTarget::LibraryId(7),
                position: 12.0,
                playing: false
            }
        );
    }

    #[test]
    fn test_unknown_action_rejected() {
        let mut host = host();
        let outcome = host.request_named_action("teleport", &json!({}));
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("teleport"));
    }

    #[test]
    fn test_missing_parameter_rejected() {
        assert!(PlaybackAction::from_name("seek", &json!({})).is_err());
        assert!(PlaybackAction::from_name("load", &json!({ "path": 3 })).is_err());
    }

    #[test]
    fn test_volume_and_mute_through_host() {
        let mut host = host();
        assert!(host.request_named_action("set_volume", &json!({ "level": 0.0 })).success);
        assert!(host.request_named_action("toggle_mute", &json!({})).success);
        assert!(host.request_named_action("toggle_mute", &json!({})).success);
        assert!(host.controller().effective_volume().abs() < f32::EPSILON);
    }

    #[test]
    fn test_audio_properties_default_to_chain() {
        let host = host();
        assert_eq!(host.get_audio_properties(), StreamProperties::default());
    }

    #[test]
    fn test_failed_action_reports_error() {
        let mut host = host();
        let outcome = host.request_playback_action(PlaybackAction::Play { offset: None });
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }
}
