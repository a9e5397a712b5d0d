//! Track type representing a single playable file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A reference to a local audio file plus whatever tags the library supplied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    /// Path of the audio file.
    pub path: PathBuf,
    /// Track title.
    pub title: String,
    /// Artist name, if tagged.
    pub artist: Option<String>,
    /// Album name, if tagged.
    pub album: Option<String>,
    /// Duration in seconds, if already probed.
    pub duration_secs: Option<f64>,
    /// Library identifier, if the track came from the library database.
    pub library_id: Option<i64>,
}

impl Track {
    /// Create a track from a path, titled after the file stem.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let title = path
            .file_stem()
            .map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned());
        Self {
            path,
            title,
            artist: None,
            album: None,
            duration_secs: None,
            library_id: None,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[must_use]
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    #[must_use]
    pub const fn with_library_id(mut self, id: i64) -> Self {
        self.library_id = Some(id);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the primary artist name.
    pub fn artist_name(&self) -> &str {
        self.artist.as_deref().unwrap_or("Unknown")
    }

    /// "Artist - Title" for status lines.
    pub fn display_name(&self) -> String {
        match &self.artist {
            Some(artist) => format!("{artist} - {}", self.title),
            None => self.title.clone(),
        }
    }
}
