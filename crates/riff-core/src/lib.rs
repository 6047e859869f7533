//! Riff Core - playback, looping and beat analysis for the Riff practice player

pub mod analysis;
pub mod audio;
pub mod config;
pub mod engine;
pub mod eq;
pub mod player;
pub mod ring_buffer;
pub mod smoother;
pub mod timestretch;
pub mod transport;
pub mod types;

pub use player::{Player, PlayerError, PlayerResult};
pub use types::*;
