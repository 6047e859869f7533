//! Lock-free parameters shared between the control and audio threads
//!
//! Every live parameter is its own atomic. The audio thread reads each one
//! once at the top of a block; the control thread writes them at any time.
//! Floats are stored as their bit patterns. Setters clamp before storing,
//! so the stored value is always the value that will be used.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::eq::{EqParams, EqSettings};
use crate::timestretch::{MAX_RATIO, MIN_RATIO};
use crate::transport::LoopRegion;

/// Pitch shift range in semitones
pub const MAX_PITCH_SEMITONES: f32 = 24.0;

/// Edge-bleed fade range in milliseconds
pub const MAX_EDGE_BLEED_MS: f32 = 100.0;
pub const DEFAULT_EDGE_BLEED_MS: f32 = 5.0;

/// Engine-level transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    Stopped,
    Playing,
}

/// Shared engine parameters and published playback state
pub struct EngineAtomics {
    tempo_ratio: AtomicU32,
    pitch_semitones: AtomicU32,
    /// 0 = Stopped, 1 = Playing
    state: AtomicU8,
    loop_start: AtomicU64,
    loop_end: AtomicU64,
    loop_enabled: AtomicBool,
    edge_bleed_ms: AtomicU32,
    /// Published by the audio thread after every block (seconds)
    position: AtomicU64,
    /// Length of the loaded source (seconds)
    duration: AtomicU64,
    /// Equalizer parameters
    pub eq: EqParams,
}

impl EngineAtomics {
    pub fn new(eq: EqSettings) -> Self {
        Self {
            tempo_ratio: AtomicU32::new(1.0f32.to_bits()),
            pitch_semitones: AtomicU32::new(0.0f32.to_bits()),
            state: AtomicU8::new(0),
            loop_start: AtomicU64::new(0.0f64.to_bits()),
            loop_end: AtomicU64::new(0.0f64.to_bits()),
            loop_enabled: AtomicBool::new(false),
            edge_bleed_ms: AtomicU32::new(DEFAULT_EDGE_BLEED_MS.to_bits()),
            position: AtomicU64::new(0.0f64.to_bits()),
            duration: AtomicU64::new(0.0f64.to_bits()),
            eq: EqParams::new(eq),
        }
    }

    /// Set playback speed, clamped to 0.25–4.0
    pub fn set_tempo_ratio(&self, ratio: f32) {
        let ratio = if ratio.is_nan() { 1.0 } else { ratio.clamp(MIN_RATIO, MAX_RATIO) };
        self.tempo_ratio.store(ratio.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn tempo_ratio(&self) -> f32 {
        f32::from_bits(self.tempo_ratio.load(Ordering::Relaxed))
    }

    /// Set pitch shift, clamped to ±24 semitones
    pub fn set_pitch_semitones(&self, semitones: f32) {
        let semitones = if semitones.is_nan() {
            0.0
        } else {
            semitones.clamp(-MAX_PITCH_SEMITONES, MAX_PITCH_SEMITONES)
        };
        self.pitch_semitones.store(semitones.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn pitch_semitones(&self) -> f32 {
        f32::from_bits(self.pitch_semitones.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn play_state(&self) -> PlayState {
        match self.state.load(Ordering::Relaxed) {
            1 => PlayState::Playing,
            _ => PlayState::Stopped,
        }
    }

    #[inline]
    pub fn set_play_state(&self, state: PlayState) {
        let value = match state {
            PlayState::Stopped => 0,
            PlayState::Playing => 1,
        };
        self.state.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.play_state() == PlayState::Playing
    }

    /// Store a loop region clamped to the current duration
    pub fn set_loop_points(&self, start: f64, end: f64) {
        let region = LoopRegion::clamped(start, end, self.duration(), false);
        self.loop_start.store(region.start.to_bits(), Ordering::Relaxed);
        self.loop_end.store(region.end.to_bits(), Ordering::Relaxed);
    }

    pub fn set_loop_enabled(&self, enabled: bool) {
        self.loop_enabled.store(enabled, Ordering::Relaxed);
    }

    #[inline]
    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled.load(Ordering::Relaxed)
    }

    /// Current loop region as one value
    ///
    /// The three fields are separate atomics; the transport re-validates
    /// `start < end` before wrapping.
    #[inline]
    pub fn loop_region(&self) -> LoopRegion {
        LoopRegion {
            start: f64::from_bits(self.loop_start.load(Ordering::Relaxed)),
            end: f64::from_bits(self.loop_end.load(Ordering::Relaxed)),
            enabled: self.loop_enabled(),
        }
    }

    /// Set the loop-edge fade length, clamped to 0–100 ms
    pub fn set_edge_bleed_ms(&self, ms: f32) {
        let ms = if ms.is_nan() { DEFAULT_EDGE_BLEED_MS } else { ms.clamp(0.0, MAX_EDGE_BLEED_MS) };
        self.edge_bleed_ms.store(ms.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn edge_bleed_ms(&self) -> f32 {
        f32::from_bits(self.edge_bleed_ms.load(Ordering::Relaxed))
    }

    /// Playback position in seconds
    #[inline]
    pub fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_position(&self, seconds: f64) {
        self.position.store(seconds.to_bits(), Ordering::Relaxed);
    }

    /// Length of the loaded source in seconds
    #[inline]
    pub fn duration(&self) -> f64 {
        f64::from_bits(self.duration.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_duration(&self, seconds: f64) {
        self.duration.store(seconds.max(0.0).to_bits(), Ordering::Relaxed);
    }
}

impl Default for EngineAtomics {
    fn default() -> Self {
        Self::new(EqSettings::default())
    }
}
