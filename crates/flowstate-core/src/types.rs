//! Core domain types for Flow State.

pub mod block;
pub mod playlist;
pub mod session;
pub mod stream;
pub mod track;

pub use block::AudioBlock;
pub use playlist::{Playlist, PlaylistEntry, RepeatMode};
pub use session::SessionState;
pub use stream::StreamProperties;
pub use track::Track;
