//! Pedal-style loop recording
//!
//! One button cycles Idle → Recording → Looping → Idle. Recording only
//! remembers where it started; stopping turns `[start, end + overlap]` into
//! the loop region.

/// Overlap range appended to a recorded loop (ms)
pub const MAX_LOOP_OVERLAP_MS: u32 = 300;
pub const DEFAULT_LOOP_OVERLAP_MS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopRecordState {
    #[default]
    Idle,
    Recording,
    Looping,
}

/// What the caller must do after a toggle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopRecordAction {
    /// Recording started at the given position
    StartRecording { start: f64 },
    /// Loop over `[start, end]`, seek to `start` and play
    StartLooping { start: f64, end: f64 },
    /// Clear the loop and return to free playback
    ClearLoop,
}

/// Three-state loop-record cycle
#[derive(Debug, Clone)]
pub struct LoopRecorder {
    state: LoopRecordState,
    start: f64,
    overlap_ms: u32,
}

impl LoopRecorder {
    pub fn new(overlap_ms: u32) -> Self {
        Self {
            state: LoopRecordState::Idle,
            start: 0.0,
            overlap_ms: overlap_ms.min(MAX_LOOP_OVERLAP_MS),
        }
    }

    pub fn state(&self) -> LoopRecordState {
        self.state
    }

    /// Set the overlap, clamped to 0–300 ms
    pub fn set_overlap_ms(&mut self, ms: u32) {
        self.overlap_ms = ms.min(MAX_LOOP_OVERLAP_MS);
    }

    pub fn overlap_ms(&self) -> u32 {
        self.overlap_ms
    }

    /// Advance the cycle using the current playback position
    pub fn toggle(&mut self, position: f64) -> LoopRecordAction {
        match self.state {
            LoopRecordState::Idle => {
                self.start = position;
                self.state = LoopRecordState::Recording;
                LoopRecordAction::StartRecording { start: position }
            }
            LoopRecordState::Recording => {
                self.state = LoopRecordState::Looping;
                LoopRecordAction::StartLooping {
                    start: self.start,
                    end: position + self.overlap_ms as f64 / 1000.0,
                }
            }
            LoopRecordState::Looping => {
                self.state = LoopRecordState::Idle;
                LoopRecordAction::ClearLoop
            }
        }
    }

    /// Back to Idle without emitting an action (new file loaded)
    pub fn reset(&mut self) {
        self.state = LoopRecordState::Idle;
        self.start = 0.0;
    }
}

impl Default for LoopRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_LOOP_OVERLAP_MS)
    }
}
