//! Source/transport stage
//!
//! Pulls interleaved stereo frames from the loaded [`Decoder`], tracks the
//! playback position and wraps at the loop end. Position is kept in frames
//! at the source rate so the loop seam lands on an exact sample no matter
//! how the engine slices its blocks.

mod decoder;

pub use decoder::{fold_to_stereo, resample_stereo, DecodeError, DecodeResult, DecodedTrack, Decoder};

use basedrop::Owned;

use crate::types::{StereoBuffer, SAMPLE_RATE};

/// A decoder whose drop is deferred to the collector thread
pub type SourceHandle = Owned<Box<dyn Decoder>>;

/// Loop region as read from the shared atomics once per block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopRegion {
    pub start: f64,
    pub end: f64,
    pub enabled: bool,
}

impl LoopRegion {
    /// Build a region with `start` clamped into `[0, duration]` and `end` into `[start, duration]`
    pub fn clamped(start: f64, end: f64, duration: f64, enabled: bool) -> Self {
        let duration = duration.max(0.0);
        let start = start.clamp(0.0, duration);
        let end = end.clamp(start, duration);
        Self { start, end, enabled }
    }

    /// Length in seconds
    pub fn length(&self) -> f64 {
        self.end - self.start
    }

    /// Whether the transport should wrap at `end`
    pub fn is_active(&self) -> bool {
        self.enabled && self.end > self.start
    }
}

impl Default for LoopRegion {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 0.0,
            enabled: false,
        }
    }
}

/// What happened during one call to [`TransportStage::process`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockReport {
    /// Frames of source audio written into the buffer
    pub frames_read: usize,
    /// The loop seam was crossed at least once
    pub wrapped: bool,
    /// The decoder ran dry with looping off
    pub end_of_stream: bool,
}

/// Source/transport stage
pub struct TransportStage {
    source: Option<SourceHandle>,
    /// Rate of the loaded source (engine rate when nothing is loaded)
    sample_rate: u32,
    /// Playback position in source frames
    position: u64,
    /// Total length in source frames
    length: u64,
}

impl TransportStage {
    pub fn new() -> Self {
        Self {
            source: None,
            sample_rate: SAMPLE_RATE,
            position: 0,
            length: 0,
        }
    }

    /// Adopt the engine rate (only used while nothing is loaded)
    pub fn prepare(&mut self, sample_rate: u32) {
        if self.source.is_none() {
            self.sample_rate = sample_rate;
        }
    }

    /// Install a new source at position 0, returning the one it replaces
    ///
    /// The returned handle must be dropped normally; its memory is reclaimed
    /// on the collector thread.
    pub fn load(&mut self, mut source: SourceHandle) -> Option<SourceHandle> {
        source.seek(0.0);
        self.sample_rate = source.sample_rate().max(1);
        self.length = (source.total_length() * self.sample_rate as f64).round() as u64;
        self.position = 0;
        self.source.replace(source)
    }

    /// Remove the current source
    pub fn unload(&mut self) -> Option<SourceHandle> {
        self.position = 0;
        self.length = 0;
        self.source.take()
    }

    pub fn is_loaded(&self) -> bool {
        self.source.is_some()
    }

    /// Move the decode cursor to `seconds`, clamped to the source
    pub fn seek(&mut self, seconds: f64) {
        let frames = self.seconds_to_frames(seconds).min(self.length);
        let Some(source) = self.source.as_mut() else {
            return;
        };
        self.position = frames;
        source.seek(self.position as f64 / self.sample_rate as f64);
    }

    /// Playback position in seconds
    pub fn position(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    /// Source length in seconds (0 when nothing is loaded)
    pub fn duration(&self) -> f64 {
        self.length as f64 / self.sample_rate as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    fn seconds_to_frames(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate as f64).round() as u64
    }

    /// Fill `output` (its current length) with source audio
    ///
    /// The buffer is cleared first so every failure path leaves silence.
    /// With looping active the read is split at the loop end and resumes at
    /// the loop start inside the same block. `edge_bleed_ms` fades both loop
    /// edges linearly while looping.
    pub fn process(
        &mut self,
        output: &mut StereoBuffer,
        region: LoopRegion,
        edge_bleed_ms: f32,
    ) -> BlockReport {
        output.fill_silence();
        let mut report = BlockReport::default();

        let sample_rate = self.sample_rate;
        let Some(source) = self.source.as_mut() else {
            return report;
        };

        let total = output.len();
        let looping = region.is_active();
        let to_frames = |seconds: f64| (seconds.max(0.0) * sample_rate as f64).round() as u64;
        let loop_start = to_frames(region.start);
        let loop_end = to_frames(region.end).max(loop_start);
        let looping = looping && loop_end > loop_start;
        let bleed = (edge_bleed_ms.max(0.0) as f64 * 0.001 * sample_rate as f64) as u64;

        if looping && self.position >= loop_end {
            source.seek(loop_start as f64 / sample_rate as f64);
            self.position = loop_start;
            report.wrapped = true;
        }

        let interleaved = output.as_interleaved_mut();
        let mut filled = 0usize;
        while filled < total {
            let mut want = total - filled;
            if looping && self.position < loop_end {
                want = want.min((loop_end - self.position) as usize);
            }

            let slice = &mut interleaved[filled * 2..(filled + want) * 2];
            let got = source.read_frames(slice, want).min(want);

            if looping && bleed > 0 {
                apply_edge_fade(
                    &mut slice[..got * 2],
                    self.position,
                    loop_start,
                    loop_end,
                    bleed,
                );
            }

            self.position += got as u64;
            filled += got;

            if looping && self.position >= loop_end {
                source.seek(loop_start as f64 / sample_rate as f64);
                self.position = loop_start;
                report.wrapped = true;
                continue;
            }

            if got == 0 {
                report.end_of_stream = true;
                break;
            }
        }

        report.frames_read = filled;
        report
    }
}

impl Default for TransportStage {
    fn default() -> Self {
        Self::new()
    }
}

/// Linear fade-in after `loop_start` and fade-out before `loop_end`
///
/// `first_frame` is the absolute frame index of `interleaved[0..2]`.
fn apply_edge_fade(
    interleaved: &mut [f32],
    first_frame: u64,
    loop_start: u64,
    loop_end: u64,
    bleed: u64,
) {
    let span = (bleed + 1) as f32;
    for (i, frame) in interleaved.chunks_exact_mut(2).enumerate() {
        let pos = first_frame + i as u64;
        if pos < loop_start || pos >= loop_end {
            continue;
        }
        let from_start = pos - loop_start;
        let to_end = loop_end - 1 - pos;
        let distance = from_start.min(to_end);
        if distance >= bleed {
            continue;
        }
        let gain = (distance + 1) as f32 / span;
        frame[0] *= gain;
        frame[1] *= gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gc_handle;

    const RATE: u32 = 1000;

    /// Track whose left channel carries the frame index
    fn ramp_track(seconds: f64) -> SourceHandle {
        let frames = (seconds * RATE as f64) as usize;
        let samples: Vec<f32> = (0..frames).flat_map(|i| [i as f32, 1.0]).collect();
        let handle = gc_handle().unwrap();
        Owned::new(&handle, Box::new(DecodedTrack::from_interleaved(samples, RATE)) as Box<dyn Decoder>)
    }

    fn block(len: usize) -> StereoBuffer {
        let mut buffer = StereoBuffer::with_capacity(len);
        buffer.set_len_from_capacity(len);
        buffer
    }

    #[test]
    fn test_unloaded_outputs_silence() {
        let mut transport = TransportStage::new();
        let mut output = StereoBuffer::from_interleaved(&[1.0; 64]);

        let report = transport.process(&mut output, LoopRegion::default(), 0.0);

        assert_eq!(report, BlockReport::default());
        assert_eq!(output.peak(), 0.0);
        assert_eq!(transport.position(), 0.0);
    }

    #[test]
    fn test_position_advances_by_frames_read() {
        let mut transport = TransportStage::new();
        transport.load(ramp_track(10.0));
        assert!((transport.duration() - 10.0).abs() < 1e-12);

        let mut output = block(250);
        let report = transport.process(&mut output, LoopRegion::default(), 0.0);

        assert_eq!(report.frames_read, 250);
        assert!((transport.position() - 0.25).abs() < 1e-12);
        assert_eq!(output[249].left, 249.0);
    }

    #[test]
    fn test_loop_wrap_lands_at_start_plus_overshoot() {
        let mut transport = TransportStage::new();
        transport.load(ramp_track(10.0));
        let region = LoopRegion::clamped(2.0, 4.0, transport.duration(), true);

        transport.seek(3.9);
        let mut output = block(300);
        let report = transport.process(&mut output, region, 0.0);

        // 100 frames up to 4.0, then 200 frames from 2.0
        assert!(report.wrapped);
        assert_eq!(report.frames_read, 300);
        assert!((transport.position() - 2.2).abs() < 1e-12);
        assert_eq!(output[99].left, 3999.0);
        assert_eq!(output[100].left, 2000.0);
        assert_eq!(output[299].left, 2199.0);
    }

    #[test]
    fn test_loop_never_runs_past_end_across_blocks() {
        let mut transport = TransportStage::new();
        transport.load(ramp_track(10.0));
        let region = LoopRegion::clamped(2.0, 4.0, 10.0, true);
        transport.seek(2.0);

        let block_len = 128;
        let block_secs = block_len as f64 / RATE as f64;
        let mut output = block(block_len);
        let mut wraps = 0;
        for _ in 0..100 {
            let before = transport.position();
            let report = transport.process(&mut output, region, 0.0);
            let after = transport.position();

            assert!(after >= 2.0 && after < 4.0);
            assert!(after <= 4.0 + block_secs);
            assert!(output.iter().all(|s| s.left >= 2000.0 && s.left < 4000.0));

            if report.wrapped {
                wraps += 1;
                let overshoot = before + block_secs - 4.0;
                assert!((after - (2.0 + overshoot)).abs() < 1e-9);
            }
        }
        assert!(wraps >= 5);
    }

    #[test]
    fn test_position_past_loop_end_jumps_to_start() {
        let mut transport = TransportStage::new();
        transport.load(ramp_track(10.0));
        transport.seek(7.0);

        let mut output = block(10);
        let region = LoopRegion::clamped(2.0, 4.0, 10.0, true);
        let report = transport.process(&mut output, region, 0.0);

        assert!(report.wrapped);
        assert_eq!(output[0].left, 2000.0);
    }

    #[test]
    fn test_end_of_stream_reported_and_tail_is_silent() {
        let mut transport = TransportStage::new();
        transport.load(ramp_track(1.0));
        transport.seek(0.95);

        let mut output = block(100);
        let report = transport.process(&mut output, LoopRegion::default(), 0.0);

        assert!(report.end_of_stream);
        assert_eq!(report.frames_read, 50);
        assert!(output.as_slice()[50..].iter().all(|s| s.left == 0.0 && s.right == 0.0));
        assert!((transport.position() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_edge_bleed_fades_both_seams() {
        let mut transport = TransportStage::new();
        transport.load(ramp_track(10.0));
        let region = LoopRegion::clamped(2.0, 4.0, 10.0, true);
        transport.seek(3.98);

        // 10ms at 1kHz is 10 frames of fade on each side
        let mut output = block(30);
        let report = transport.process(&mut output, region, 10.0);

        assert!(report.wrapped);
        assert_eq!(output[0].right, 1.0);
        assert!(output[19].right < 0.2);
        assert!(output[20].right < 0.2);
        assert!(output[29].right > output[20].right);
    }

    #[test]
    fn test_loop_region_clamping() {
        let region = LoopRegion::clamped(-1.0, 20.0, 10.0, true);
        assert_eq!((region.start, region.end), (0.0, 10.0));

        let region = LoopRegion::clamped(6.0, 3.0, 10.0, true);
        assert_eq!((region.start, region.end), (6.0, 6.0));
        assert!(!region.is_active());
    }

    #[test]
    fn test_load_replaces_and_returns_previous() {
        let mut transport = TransportStage::new();
        assert!(transport.load(ramp_track(1.0)).is_none());
        transport.seek(0.5);

        let previous = transport.load(ramp_track(2.0));
        assert!(previous.is_some());
        assert_eq!(transport.position(), 0.0);
        assert!((transport.duration() - 2.0).abs() < 1e-12);

        assert!(transport.unload().is_some());
        assert!(!transport.is_loaded());
    }
}
