//! Player configuration
//!
//! ```ignore
//! use riff_core::config::{default_config_path, load_config, save_config, PlayerConfig};
//!
//! let path = default_config_path();
//! let config: PlayerConfig = load_config(&path);
//! save_config(&config, &path)?;
//! ```

mod io;
mod paths;

use serde::{Deserialize, Serialize};

use crate::audio::AudioConfig;
use crate::engine::DEFAULT_EDGE_BLEED_MS;
use crate::eq::EqSettings;
use crate::player::{DEFAULT_GRID_BPM, DEFAULT_LOOP_OVERLAP_MS};

pub use io::{load_config, save_config};
pub use paths::{config_dir, default_config_path, CONFIG_FILE_NAME};

/// Persistent player settings
///
/// Every field has a default, so a partial file only overrides what it
/// names. Out-of-range values are clamped when the player applies them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub audio: AudioConfig,
    /// Run live beat/onset analysis
    pub analysis_enabled: bool,
    /// Tail added to a recorded loop (0–300 ms)
    pub loop_overlap_ms: u32,
    /// Fade length at loop edges (0–100 ms)
    pub edge_bleed_ms: f32,
    /// Snap A/B points to the BPM grid
    pub snap_to_grid: bool,
    /// Grid tempo (60–200)
    pub grid_bpm: f64,
    /// Equalizer settings at startup
    pub eq: EqSettings,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            analysis_enabled: true,
            loop_overlap_ms: DEFAULT_LOOP_OVERLAP_MS,
            edge_bleed_ms: DEFAULT_EDGE_BLEED_MS,
            snap_to_grid: false,
            grid_bpm: DEFAULT_GRID_BPM,
            eq: EqSettings::default(),
        }
    }
}
