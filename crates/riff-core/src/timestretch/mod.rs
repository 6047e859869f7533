//! Time/pitch stretching via signalsmith-stretch
//!
//! Decouples playback speed from pitch. The stretcher works on a
//! "fixed output" model: each call consumes however many input frames the
//! current time ratio calls for and produces exactly one output block, so
//! the stage tells the engine how much source audio to pull before every
//! block (see [`StretchStage::input_frames_for`]).
//!
//! Time ratio and pitch scale each pass through a [`Smoother`] that is
//! pulled once per block but advanced by that block's length in samples,
//! so a glide takes the same time whatever block size the device uses.

use signalsmith_stretch::Stretch;

use crate::smoother::Smoother;
use crate::types::{StereoBuffer, SAMPLE_RATE};

/// Number of channels (stereo)
const CHANNELS: u32 = 2;

/// Slowest and fastest supported playback, also the pitch scale bounds
pub const MIN_RATIO: f32 = 0.25;
pub const MAX_RATIO: f32 = 4.0;

/// Glide time for tempo and pitch changes
pub const STRETCH_SMOOTHING_MS: f64 = 50.0;

/// Convert a semitone offset to a frequency ratio
#[inline]
pub fn semitones_to_scale(semitones: f32) -> f32 {
    2.0_f32.powf(semitones / 12.0)
}

/// Time/pitch stretch stage
///
/// The underlying stretcher is created in [`prepare`](Self::prepare) and
/// dropped in [`release`](Self::release). Until it is prepared the stage
/// outputs silence.
pub struct StretchStage {
    /// The signalsmith stretcher (present between prepare and release)
    stretcher: Option<Stretch>,
    /// Smoothed playback speed multiplier
    time_ratio: Smoother,
    /// Smoothed frequency multiplier
    pitch_scale: Smoother,
    /// Pitch scale last handed to the stretcher
    applied_pitch_scale: f32,
    /// Fractional input frames carried between blocks
    input_phase: f64,
    sample_rate: u32,
    max_block_size: usize,
}

impl StretchStage {
    pub fn new() -> Self {
        Self {
            stretcher: None,
            time_ratio: Smoother::new(1.0),
            pitch_scale: Smoother::new(1.0),
            applied_pitch_scale: 1.0,
            input_phase: 0.0,
            sample_rate: SAMPLE_RATE,
            max_block_size: 0,
        }
    }

    /// Build the stretcher and configure smoothing for this device setup
    ///
    /// Called off the audio thread (device about-to-start). A changed sample
    /// rate rebuilds the stretcher from scratch.
    pub fn prepare(&mut self, sample_rate: u32, max_block_size: usize) {
        let rebuild = self.stretcher.is_none() || self.sample_rate != sample_rate;
        self.sample_rate = sample_rate;
        self.max_block_size = max_block_size.max(1);

        if rebuild {
            let mut stretcher = Stretch::preset_default(CHANNELS, sample_rate);
            stretcher.set_transpose_factor_semitones(scale_to_semitones(self.pitch_scale.current()), None);
            self.stretcher = Some(stretcher);
            self.applied_pitch_scale = self.pitch_scale.current();
            log::debug!(
                "StretchStage: prepared at {}Hz, max block {} frames",
                sample_rate,
                self.max_block_size
            );
        }

        self.time_ratio.configure(sample_rate as f64, STRETCH_SMOOTHING_MS);
        self.pitch_scale.configure(sample_rate as f64, STRETCH_SMOOTHING_MS);
        self.input_phase = 0.0;
    }

    /// Drop the stretcher (device stopped)
    pub fn release(&mut self) {
        self.stretcher = None;
        self.input_phase = 0.0;
    }

    pub fn is_prepared(&self) -> bool {
        self.stretcher.is_some()
    }

    /// Largest number of source frames a single block can ask for
    pub fn max_input_frames(max_block_size: usize) -> usize {
        (max_block_size as f64 * MAX_RATIO as f64).ceil() as usize + 1
    }

    /// Set the playback speed target (clamped to 0.25–4.0)
    pub fn set_time_ratio(&mut self, ratio: f32) {
        self.time_ratio.set_target(ratio.clamp(MIN_RATIO, MAX_RATIO));
    }

    /// Set the pitch frequency-ratio target (clamped to 0.25–4.0)
    pub fn set_pitch_scale(&mut self, scale: f32) {
        self.pitch_scale.set_target(scale.clamp(MIN_RATIO, MAX_RATIO));
    }

    /// Set the pitch target from a semitone offset
    pub fn set_pitch_semitones(&mut self, semitones: f32) {
        self.set_pitch_scale(semitones_to_scale(semitones));
    }

    /// Jump both parameters onto their targets with no glide
    pub fn snap_to_targets(&mut self) {
        self.time_ratio.set_current_and_target(self.time_ratio.target());
        self.pitch_scale.set_current_and_target(self.pitch_scale.target());
    }

    /// Current (smoothed) playback speed
    pub fn time_ratio(&self) -> f32 {
        self.time_ratio.current()
    }

    /// Current (smoothed) pitch scale
    pub fn pitch_scale(&self) -> f32 {
        self.pitch_scale.current()
    }

    pub fn time_ratio_target(&self) -> f32 {
        self.time_ratio.target()
    }

    pub fn pitch_scale_target(&self) -> f32 {
        self.pitch_scale.target()
    }

    /// Advance both smoothers over a block of `frames` and push pitch into
    /// the stretcher
    pub fn update_parameters(&mut self, frames: usize) {
        self.time_ratio.skip(frames);
        let pitch = self.pitch_scale.skip(frames);

        if pitch != self.applied_pitch_scale {
            if let Some(stretcher) = self.stretcher.as_mut() {
                stretcher.set_transpose_factor_semitones(scale_to_semitones(pitch), None);
            }
            self.applied_pitch_scale = pitch;
        }
    }

    /// Number of source frames to feed for an output block of `output_frames`
    ///
    /// Fractional frames are carried into the next block so the long-run
    /// consumption rate matches the time ratio exactly.
    pub fn input_frames_for(&mut self, output_frames: usize) -> usize {
        self.input_phase += output_frames as f64 * self.time_ratio.current() as f64;
        let frames = self.input_phase.floor();
        self.input_phase -= frames;
        frames as usize
    }

    /// Stretch `input` into `output`, returning the frames of real output
    ///
    /// Every frame of `output` is written: frames the stretcher could not
    /// produce are explicit silence. An empty `input` is valid (very slow
    /// tempo on a tiny block); the stretcher still renders from its history.
    pub fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer) -> usize {
        let output_len = output.len();
        let Some(stretcher) = self.stretcher.as_mut() else {
            output.fill_silence();
            return 0;
        };

        if output_len == 0 {
            return 0;
        }

        // Cleared first so nothing stale survives if the stretcher writes less
        let output_interleaved = output.as_interleaved_mut();
        output_interleaved.fill(0.0);
        stretcher.process(input.as_interleaved(), &mut output_interleaved[..]);
        output_len
    }

    /// Clear the stretcher's internal history (used after a seek or loop wrap)
    pub fn reset(&mut self) {
        if let Some(stretcher) = self.stretcher.as_mut() {
            stretcher.reset();
        }
        self.input_phase = 0.0;
    }

    /// Input latency in frames (0 when not prepared)
    pub fn input_latency(&self) -> usize {
        self.stretcher.as_ref().map_or(0, |s| s.input_latency())
    }

    /// Output latency in frames (0 when not prepared)
    pub fn output_latency(&self) -> usize {
        self.stretcher.as_ref().map_or(0, |s| s.output_latency())
    }
}

impl Default for StretchStage {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn scale_to_semitones(scale: f32) -> f32 {
    12.0 * scale.log2()
}
