//! # flowstate-core
//!
//! Core types, traits, and error handling for the Flow State music player.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
