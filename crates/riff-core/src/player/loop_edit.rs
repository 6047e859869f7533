//! A/B loop editing and the BPM snap grid
//!
//! Every operation reads the live loop points from [`EngineAtomics`],
//! computes the new region and writes it back. Operations whose result would
//! leave the file or shrink the loop below [`MIN_LOOP_SECS`] leave the region
//! untouched and return `false`.

use crate::analysis::AnalysisResult;
use crate::engine::EngineAtomics;

/// Shortest loop the editing operations will produce
pub const MIN_LOOP_SECS: f64 = 0.1;

/// Bar length used when no tempo has been detected
pub const DEFAULT_BAR_SECS: f64 = 2.0;

/// Grid tempo range
pub const MIN_GRID_BPM: f64 = 60.0;
pub const MAX_GRID_BPM: f64 = 200.0;
pub const DEFAULT_GRID_BPM: f64 = 120.0;

/// Evenly spaced beat grid used to snap A/B points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatGrid {
    bpm: f64,
    snap_enabled: bool,
}

impl BeatGrid {
    pub fn new(bpm: f64, snap_enabled: bool) -> Self {
        let mut grid = Self {
            bpm: DEFAULT_GRID_BPM,
            snap_enabled,
        };
        grid.set_bpm(bpm);
        grid
    }

    /// Set the grid tempo, clamped to 60–200
    pub fn set_bpm(&mut self, bpm: f64) {
        if bpm.is_finite() {
            self.bpm = bpm.clamp(MIN_GRID_BPM, MAX_GRID_BPM);
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn set_snap_enabled(&mut self, enabled: bool) {
        self.snap_enabled = enabled;
    }

    pub fn snap_enabled(&self) -> bool {
        self.snap_enabled
    }

    /// Seconds between grid lines
    pub fn beat_interval(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Nearest grid line when snapping is on, otherwise `seconds` unchanged
    pub fn snap(&self, seconds: f64) -> f64 {
        if !self.snap_enabled {
            return seconds;
        }
        let interval = self.beat_interval();
        ((seconds / interval).round() * interval).max(0.0)
    }

    /// Every grid line from 0 up to `duration`
    pub fn positions(&self, duration: f64) -> Vec<f64> {
        let interval = self.beat_interval();
        let count = (duration.max(0.0) / interval).floor() as usize;
        (0..=count).map(|k| k as f64 * interval).collect()
    }
}

impl Default for BeatGrid {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_BPM, false)
    }
}

/// A/B loop editor
///
/// Tracks which of the two points the user has placed; the points
/// themselves live in the engine atomics.
#[derive(Debug, Clone, Default)]
pub struct LoopEditor {
    has_a: bool,
    has_b: bool,
}

impl LoopEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_a(&self) -> bool {
        self.has_a
    }

    pub fn has_b(&self) -> bool {
        self.has_b
    }

    fn points(atomics: &EngineAtomics) -> (f64, f64) {
        let region = atomics.loop_region();
        (region.start, region.end)
    }

    /// Place A at `position` (grid-snapped); looping starts once B is also set
    ///
    /// A placed past an existing B swaps the two, so the region becomes
    /// `[B, position]` instead of collapsing.
    pub fn set_a(&mut self, atomics: &EngineAtomics, grid: &BeatGrid, position: f64) {
        let a = grid.snap(position);
        let (_, end) = Self::points(atomics);
        if self.has_b && a > end {
            atomics.set_loop_points(end, a);
        } else {
            atomics.set_loop_points(a, end);
        }
        self.has_a = true;
        if self.has_b {
            atomics.set_loop_enabled(true);
        }
    }

    /// Place B at `position` (grid-snapped); looping starts once A is also set
    ///
    /// B placed before an existing A swaps the two.
    pub fn set_b(&mut self, atomics: &EngineAtomics, grid: &BeatGrid, position: f64) {
        let b = grid.snap(position);
        let (start, _) = Self::points(atomics);
        if self.has_a && b < start {
            atomics.set_loop_points(b, start);
        } else {
            atomics.set_loop_points(start, b);
        }
        self.has_b = true;
        if self.has_a {
            atomics.set_loop_enabled(true);
        }
    }

    /// Set both points at once and start looping
    pub fn set_region(&mut self, atomics: &EngineAtomics, start: f64, end: f64) {
        atomics.set_loop_points(start, end);
        self.has_a = true;
        self.has_b = true;
        atomics.set_loop_enabled(true);
    }

    /// Stop looping, forget A and B, and reset the region to the whole file
    pub fn clear(&mut self, atomics: &EngineAtomics) {
        atomics.set_loop_enabled(false);
        self.has_a = false;
        self.has_b = false;
        atomics.set_loop_points(0.0, atomics.duration());
    }

    /// Nudge A by `delta` seconds (floored at 0, kept below B)
    pub fn jog_start(&self, atomics: &EngineAtomics, delta: f64) -> bool {
        if !self.has_a {
            return false;
        }
        let (start, end) = Self::points(atomics);
        let new_start = start + delta;
        if new_start >= end {
            return false;
        }
        atomics.set_loop_points(new_start.max(0.0), end);
        true
    }

    /// Nudge B by `delta` seconds (capped at the duration, kept above A)
    pub fn jog_end(&self, atomics: &EngineAtomics, delta: f64) -> bool {
        if !self.has_b {
            return false;
        }
        let (start, end) = Self::points(atomics);
        let new_end = end + delta;
        if new_end <= start {
            return false;
        }
        atomics.set_loop_points(start, new_end.min(atomics.duration()));
        true
    }

    /// Double the loop length, if it still fits in the file
    pub fn double(&self, atomics: &EngineAtomics) -> bool {
        if !(self.has_a && self.has_b) {
            return false;
        }
        let (start, end) = Self::points(atomics);
        let new_end = start + (end - start) * 2.0;
        if new_end > atomics.duration() {
            return false;
        }
        atomics.set_loop_points(start, new_end);
        true
    }

    /// Halve the loop length (loops of 0.1s or less are left alone)
    pub fn halve(&self, atomics: &EngineAtomics) -> bool {
        if !(self.has_a && self.has_b) {
            return false;
        }
        let (start, end) = Self::points(atomics);
        let length = end - start;
        if length <= MIN_LOOP_SECS {
            return false;
        }
        atomics.set_loop_points(start, start + length * 0.5);
        true
    }

    /// Shift the region forward by its own length
    pub fn move_forward(&self, atomics: &EngineAtomics) -> bool {
        if !(self.has_a && self.has_b) {
            return false;
        }
        let (start, end) = Self::points(atomics);
        let length = end - start;
        if end + length > atomics.duration() {
            return false;
        }
        atomics.set_loop_points(start + length, end + length);
        true
    }

    /// Shift the region backward by its own length
    pub fn move_backward(&self, atomics: &EngineAtomics) -> bool {
        if !(self.has_a && self.has_b) {
            return false;
        }
        let (start, end) = Self::points(atomics);
        let length = end - start;
        if start - length < 0.0 {
            return false;
        }
        atomics.set_loop_points(start - length, end - length);
        true
    }

    /// Push B out by one bar
    pub fn extend_by_bar(&self, atomics: &EngineAtomics, bar: f64) -> bool {
        let (start, end) = Self::points(atomics);
        let new_end = end + bar;
        if new_end > atomics.duration() {
            return false;
        }
        atomics.set_loop_points(start, new_end);
        true
    }

    /// Pull B in by one bar, keeping at least 0.1s of loop
    pub fn shorten_by_bar(&self, atomics: &EngineAtomics, bar: f64) -> bool {
        let (start, end) = Self::points(atomics);
        let new_end = end - bar;
        if new_end <= start + MIN_LOOP_SECS {
            return false;
        }
        atomics.set_loop_points(start, new_end);
        true
    }

    /// Move A onto the nearest detected beat
    pub fn snap_start_to_beat(&self, atomics: &EngineAtomics, analysis: &AnalysisResult) -> bool {
        let (start, end) = Self::points(atomics);
        match valid_nearest_beat(analysis, start) {
            Some(beat) if beat < end - MIN_LOOP_SECS => {
                atomics.set_loop_points(beat, end);
                true
            }
            _ => false,
        }
    }

    /// Move B onto the nearest detected beat
    pub fn snap_end_to_beat(&self, atomics: &EngineAtomics, analysis: &AnalysisResult) -> bool {
        let (start, end) = Self::points(atomics);
        match valid_nearest_beat(analysis, end) {
            Some(beat) if beat > start + MIN_LOOP_SECS => {
                atomics.set_loop_points(start, beat);
                true
            }
            _ => false,
        }
    }

    /// Move both points onto their nearest beats
    pub fn snap_to_beats(&self, atomics: &EngineAtomics, analysis: &AnalysisResult) -> bool {
        let (start, end) = Self::points(atomics);
        let snapped = valid_nearest_beat(analysis, start).zip(valid_nearest_beat(analysis, end));
        match snapped {
            Some((new_start, new_end)) if new_end > new_start + MIN_LOOP_SECS => {
                atomics.set_loop_points(new_start, new_end);
                true
            }
            _ => false,
        }
    }

    /// Loop `bars` bars starting at `position`
    pub fn loop_here(
        &mut self,
        atomics: &EngineAtomics,
        position: f64,
        bars: u32,
        bar: f64,
    ) -> bool {
        let duration = atomics.duration();
        if duration <= 0.0 || bars == 0 {
            return false;
        }
        let start = position.clamp(0.0, duration);
        let end = (start + bars as f64 * bar).min(duration);
        if end - start < MIN_LOOP_SECS {
            return false;
        }
        self.set_region(atomics, start, end);
        true
    }
}

fn valid_nearest_beat(analysis: &AnalysisResult, seconds: f64) -> Option<f64> {
    if !analysis.is_valid {
        return None;
    }
    analysis.nearest_beat(seconds)
}

/// Bar length from the latest analysis, or [`DEFAULT_BAR_SECS`]
pub fn bar_duration(analysis: &AnalysisResult) -> f64 {
    analysis.bar_duration().unwrap_or(DEFAULT_BAR_SECS)
}
