//! Playlist management types.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Track;

/// A single entry in the playlist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaylistEntry {
    /// Unique identifier for this entry.
    pub id: Uuid,
    /// The track to play.
    pub track: Track,
}

impl PlaylistEntry {
    pub fn new(track: Track) -> Self {
        Self {
            id: Uuid::new_v4(),
            track,
        }
    }
}

/// The playback order: natural order, a shuffle permutation and a repeat mode.
///
/// `current_index` always indexes `entries`; when shuffle is on the active
/// order is `shuffle_order`, a permutation of entry indices that starts at
/// the track that was current when shuffle was switched on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Playlist {
    /// All entries in natural order.
    entries: Vec<PlaylistEntry>,
    /// Current playback index into `entries`.
    current_index: Option<usize>,
    /// Repeat mode.
    repeat_mode: RepeatMode,
    /// Shuffle enabled.
    shuffle: bool,
    /// Shuffle order (indices into entries).
    shuffle_order: Vec<usize>,
    /// Bumped on every reshuffle so consecutive shuffles differ.
    shuffle_generation: u64,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a playlist from tracks, starting at the first one.
    pub fn from_tracks(tracks: impl IntoIterator<Item = Track>) -> Self {
        let mut playlist = Self::new();
        for track in tracks {
            playlist.push(track);
        }
        playlist
    }

    /// Get all entries in natural order.
    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    /// Get an entry by index.
    pub fn get(&self, index: usize) -> Option<&PlaylistEntry> {
        self.entries.get(index)
    }

    /// Get the current entry.
    pub fn current(&self) -> Option<&PlaylistEntry> {
        self.current_index.and_then(|i| self.entries.get(i))
    }

    /// Get the current index.
    pub const fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    /// Find the index of the first entry with this path.
    pub fn index_of_path(&self, path: &std::path::Path) -> Option<usize> {
        self.entries.iter().position(|e| e.track.path == path)
    }

    /// Get the number of entries.
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the playlist is empty.
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a track to the end of the playlist.
    pub fn push(&mut self, track: Track) -> Uuid {
        let entry = PlaylistEntry::new(track);
        let id = entry.id;
        let index = self.entries.len();
        self.entries.push(entry);
        self.shuffle_order.push(index);

        if self.current_index.is_none() {
            self.current_index = Some(0);
        }
        id
    }

    /// Insert a track at a specific position.
    pub fn insert(&mut self, index: usize, track: Track) -> Uuid {
        let index = index.min(self.entries.len());
        let entry = PlaylistEntry::new(track);
        let id = entry.id;
        self.entries.insert(index, entry);

        // Update current index if necessary
        if let Some(current) = self.current_index {
            if index <= current {
                self.current_index = Some(current + 1);
            }
        } else {
            self.current_index = Some(0);
        }

        for slot in &mut self.shuffle_order {
            if *slot >= index {
                *slot += 1;
            }
        }
        self.shuffle_order.push(index);
        id
    }

    /// Remove an entry by its UUID.
    pub fn remove(&mut self, id: Uuid) -> Option<PlaylistEntry> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        self.remove_at(index)
    }

    /// Remove an entry at a specific index.
    ///
    /// Removing the current entry moves the current index to the entry
    /// that slid into its place (or the new last entry).
    pub fn remove_at(&mut self, index: usize) -> Option<PlaylistEntry> {
        if index >= self.entries.len() {
            return None;
        }

        let entry = self.entries.remove(index);

        // Update current index
        if let Some(current) = self.current_index {
            if self.entries.is_empty() {
                self.current_index = None;
            } else if index < current {
                self.current_index = Some(current - 1);
            } else if index == current && current >= self.entries.len() {
                self.current_index = Some(self.entries.len() - 1);
            }
        }

        self.shuffle_order.retain(|&slot| slot != index);
        for slot in &mut self.shuffle_order {
            if *slot > index {
                *slot -= 1;
            }
        }

        Some(entry)
    }

    /// Clear the entire playlist.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_index = None;
        self.shuffle_order.clear();
    }

    /// Set the playlist contents, replacing everything.
    pub fn set(&mut self, tracks: Vec<Track>, start_index: usize) {
        self.entries = tracks.into_iter().map(PlaylistEntry::new).collect();
        self.current_index = if self.entries.is_empty() {
            None
        } else {
            Some(start_index.min(self.entries.len() - 1))
        };
        self.rebuild_shuffle_order();
    }

    /// Move to the track that follows the current one finishing.
    ///
    /// Honors repeat mode: `One` stays put, `All` wraps, `Off` returns
    /// `None` at the end of the active order.
    pub fn advance_after_end(&mut self) -> Option<usize> {
        let next = self.step(1, self.repeat_mode);
        self.move_to(next)
    }

    /// Skip to the next track on user request.
    ///
    /// `One` behaves like `All` here so the user can always leave a looped track.
    pub fn skip_forward(&mut self) -> Option<usize> {
        let next = self.step(1, self.user_repeat_mode());
        self.move_to(next)
    }

    /// Skip to the previous track on user request.
    pub fn skip_backward(&mut self) -> Option<usize> {
        let prev = self.step(-1, self.user_repeat_mode());
        self.move_to(prev)
    }

    /// Peek at the entry `advance_after_end` would move to.
    pub fn peek_next(&self) -> Option<&PlaylistEntry> {
        self.step(1, self.repeat_mode)
            .and_then(|i| self.entries.get(i))
    }

    /// Jump to a specific index.
    pub fn jump_to(&mut self, index: usize) -> Option<&PlaylistEntry> {
        if index < self.entries.len() {
            self.current_index = Some(index);
            self.entries.get(index)
        } else {
            None
        }
    }

    /// Get repeat mode.
    pub const fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    /// Set repeat mode.
    pub const fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat_mode = mode;
    }

    /// Cycle through repeat modes.
    pub const fn cycle_repeat(&mut self) -> RepeatMode {
        self.repeat_mode = match self.repeat_mode {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        };
        self.repeat_mode
    }

    /// Check if shuffle is enabled.
    pub const fn is_shuffle(&self) -> bool {
        self.shuffle
    }

    /// Set shuffle mode.
    ///
    /// Turning shuffle on always draws a fresh permutation anchored at the
    /// current entry.
    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.shuffle = shuffle;
        if shuffle {
            self.rebuild_shuffle_order();
        }
    }

    /// Toggle shuffle mode.
    pub fn toggle_shuffle(&mut self) -> bool {
        self.set_shuffle(!self.shuffle);
        self.shuffle
    }

    /// Entry indices in the order they will be played.
    pub fn play_order(&self) -> Vec<usize> {
        if self.shuffle {
            self.shuffle_order.clone()
        } else {
            (0..self.entries.len()).collect()
        }
    }

    /// Position of the current entry within the active order.
    pub fn order_position(&self) -> Option<usize> {
        let current = self.current_index?;
        if self.shuffle {
            self.shuffle_order.iter().position(|&i| i == current)
        } else {
            Some(current)
        }
    }

    const fn user_repeat_mode(&self) -> RepeatMode {
        match self.repeat_mode {
            RepeatMode::One => RepeatMode::All,
            mode => mode,
        }
    }

    fn move_to(&mut self, index: Option<usize>) -> Option<usize> {
        if let Some(index) = index {
            self.current_index = Some(index);
        }
        index
    }

    fn step(&self, direction: isize, repeat: RepeatMode) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }

        let current = self.current_index.unwrap_or(0);
        if repeat == RepeatMode::One {
            return Some(current);
        }

        let order = self.play_order();
        let len = order.len() as isize;
        let pos = order.iter().position(|&i| i == current).unwrap_or(0) as isize;
        let target = pos + direction;

        let target = if (0..len).contains(&target) {
            target
        } else if repeat == RepeatMode::All {
            target.rem_euclid(len)
        } else {
            return None;
        };

        order.get(target as usize).copied()
    }

    fn rebuild_shuffle_order(&mut self) {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let anchor = self.current_index;
        self.shuffle_order = (0..self.entries.len())
            .filter(|&i| Some(i) != anchor)
            .collect();

        if self.shuffle && self.shuffle_order.len() > 1 {
            // Deterministic shuffle seeded by entry IDs and the reshuffle count
            let mut hasher = DefaultHasher::new();
            for entry in &self.entries {
                entry.id.hash(&mut hasher);
            }
            self.shuffle_generation = self.shuffle_generation.wrapping_add(1);
            self.shuffle_generation.hash(&mut hasher);
            let seed = hasher.finish();

            // Fisher-Yates shuffle with deterministic random
            let mut rng_state = seed;
            for i in (1..self.shuffle_order.len()).rev() {
                rng_state = rng_state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1);
                let j = ((rng_state >> 33) as usize) % (i + 1);
                self.shuffle_order.swap(i, j);
            }
        }

        if let Some(anchor) = anchor {
            self.shuffle_order.insert(0, anchor);
        }
    }
}

/// Repeat mode for playback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// No repeat.
    #[default]
    Off,
    /// Repeat the entire playlist.
    All,
    /// Repeat the current track.
    One,
}

impl RepeatMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::All => "all",
            Self::One => "one",
        }
    }
}

impl std::str::FromStr for RepeatMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "all" | "playlist" => Ok(Self::All),
            "one" | "track" | "single" => Ok(Self::One),
            other => Err(crate::Error::InvalidArgument(format!(
                "unknown repeat mode '{other}'"
            ))),
        }
    }
}
