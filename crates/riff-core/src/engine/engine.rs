//! Main audio engine: source → stretch → EQ → output

use std::sync::Arc;

use crate::analysis::AnalysisFeeder;
use crate::eq::{EqSettings, EqStage};
use crate::smoother::Smoother;
use crate::timestretch::StretchStage;
use crate::transport::TransportStage;
use crate::types::{StereoBuffer, SAMPLE_RATE};

use super::{EngineAtomics, EngineCommand, PlayState};

/// Largest block the engine processes in one pass
///
/// Covers every common device buffer size; the device callback splits
/// anything larger. Pre-allocating to this size keeps the callback free of
/// allocations.
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Glide time for tempo and pitch at the engine level
pub const PARAMETER_SMOOTHING_MS: f64 = 50.0;

/// The playback engine, owned by the audio thread
///
/// Topology is fixed: each stage is a typed field and the block flow in
/// [`process`](Self::process) wires them together.
pub struct AudioEngine {
    transport: TransportStage,
    stretch: StretchStage,
    eq: EqStage,
    atomics: Arc<EngineAtomics>,
    commands: rtrb::Consumer<EngineCommand>,
    analysis: Option<AnalysisFeeder>,
    /// Per-sample tempo smoother, advanced a whole block at a time
    tempo: Smoother,
    /// Per-sample pitch smoother (semitones)
    pitch: Smoother,
    /// Source frames for the current block (sized for the fastest tempo)
    source_buffer: StereoBuffer,
    sample_rate: u32,
    max_block_size: usize,
    prepared: bool,
}

impl AudioEngine {
    pub fn new(
        atomics: Arc<EngineAtomics>,
        commands: rtrb::Consumer<EngineCommand>,
        analysis: Option<AnalysisFeeder>,
    ) -> Self {
        let eq_settings: EqSettings = atomics.eq.snapshot();
        Self {
            transport: TransportStage::new(),
            stretch: StretchStage::new(),
            eq: EqStage::new(eq_settings),
            tempo: Smoother::new(atomics.tempo_ratio()),
            pitch: Smoother::new(atomics.pitch_semitones()),
            atomics,
            commands,
            analysis,
            source_buffer: StereoBuffer::with_capacity(StretchStage::max_input_frames(
                MAX_BUFFER_SIZE,
            )),
            sample_rate: SAMPLE_RATE,
            max_block_size: MAX_BUFFER_SIZE,
            prepared: false,
        }
    }

    /// Shared parameter block
    pub fn atomics(&self) -> Arc<EngineAtomics> {
        Arc::clone(&self.atomics)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Device is about to start: size everything for `sample_rate` / `max_block_size`
    ///
    /// Called off the audio thread before the stream runs.
    pub fn about_to_start(&mut self, sample_rate: u32, max_block_size: usize) {
        let max_block_size = max_block_size.clamp(1, MAX_BUFFER_SIZE);
        self.sample_rate = sample_rate;
        self.max_block_size = max_block_size;

        self.tempo.configure(sample_rate as f64, PARAMETER_SMOOTHING_MS);
        self.pitch.configure(sample_rate as f64, PARAMETER_SMOOTHING_MS);
        self.tempo.set_current_and_target(self.atomics.tempo_ratio());
        self.pitch.set_current_and_target(self.atomics.pitch_semitones());

        self.stretch.prepare(sample_rate, max_block_size);
        self.stretch.set_time_ratio(self.tempo.current());
        self.stretch.set_pitch_semitones(self.pitch.current());
        self.stretch.snap_to_targets();

        self.eq.prepare(sample_rate, max_block_size);
        self.eq.set_targets(&self.atomics.eq.snapshot());
        self.eq.snap_to_targets();

        self.transport.prepare(sample_rate);
        if let Some(feeder) = self.analysis.as_ref() {
            feeder.set_sample_rate(sample_rate);
        }
        self.prepared = true;

        log::info!(
            "AudioEngine: prepared at {}Hz, max block {} frames, stretch latency {} frames",
            sample_rate,
            max_block_size,
            self.stretch.input_latency() + self.stretch.output_latency()
        );
    }

    /// Device stopped: release the stretcher and clear filter state
    pub fn stopped(&mut self) {
        self.stretch.release();
        self.eq.reset();
        self.source_buffer.set_len_from_capacity(0);
        self.prepared = false;
        log::info!("AudioEngine: released");
    }

    /// Apply every queued command (start of each block)
    fn process_commands(&mut self) {
        while let Ok(cmd) = self.commands.pop() {
            match cmd {
                EngineCommand::LoadSource(source) => {
                    // Replaced source is dropped here; basedrop frees it on the GC thread
                    drop(self.transport.load(source));
                    self.stretch.reset();
                    self.eq.reset();
                    self.atomics.set_duration(self.transport.duration());
                }
                EngineCommand::UnloadSource => {
                    drop(self.transport.unload());
                    self.stretch.reset();
                    self.atomics.set_play_state(PlayState::Stopped);
                    self.atomics.set_duration(0.0);
                }
                EngineCommand::Seek(seconds) => {
                    self.transport.seek(seconds);
                    self.stretch.reset();
                }
                EngineCommand::Stop => {
                    self.transport.seek(0.0);
                    self.stretch.reset();
                }
            }
        }
        self.atomics.set_position(self.transport.position());
    }

    /// Render one block into `output` (its current length)
    ///
    /// Real-time safe: no locks, no allocation. Anything that cannot run
    /// (not prepared, nothing loaded, not playing) produces silence.
    pub fn process(&mut self, output: &mut StereoBuffer) {
        self.process_commands();

        let frames = output.len();
        if !self.prepared || frames == 0 {
            output.fill_silence();
            return;
        }

        // Parameters are read once per block
        self.tempo.set_target(self.atomics.tempo_ratio());
        self.pitch.set_target(self.atomics.pitch_semitones());
        let tempo = self.tempo.skip(frames);
        let pitch = self.pitch.skip(frames);
        self.stretch.set_time_ratio(tempo);
        self.stretch.set_pitch_semitones(pitch);
        self.eq.set_targets(&self.atomics.eq.snapshot());

        if !self.atomics.is_playing() || !self.transport.is_loaded() {
            output.fill_silence();
            return;
        }

        self.stretch.update_parameters(frames);
        let needed = self
            .stretch
            .input_frames_for(frames)
            .min(self.source_buffer.capacity());
        self.source_buffer.set_len_from_capacity(needed);

        let report = self.transport.process(
            &mut self.source_buffer,
            self.atomics.loop_region(),
            self.atomics.edge_bleed_ms(),
        );

        self.stretch.process(&self.source_buffer, output);
        self.eq.process(output);

        self.atomics.set_position(self.transport.position());
        if report.end_of_stream {
            self.atomics.set_play_state(PlayState::Stopped);
        }

        if let Some(feeder) = self.analysis.as_mut() {
            feeder.feed(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisWorker, RING_CAPACITY};
    use crate::engine::{command_channel, gc_handle, CommandSender};
    use crate::transport::{DecodedTrack, Decoder};
    use basedrop::Owned;

    const BLOCK: usize = 480;

    fn sine_track(seconds: f64) -> Owned<Box<dyn Decoder>> {
        let frames = (seconds * 48000.0) as usize;
        let samples: Vec<f32> = (0..frames)
            .flat_map(|i| {
                let v = (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 48000.0).sin() * 0.5;
                [v, v]
            })
            .collect();
        let handle = gc_handle().unwrap();
        Owned::new(&handle, Box::new(DecodedTrack::from_interleaved(samples, 48000)) as Box<dyn Decoder>)
    }

    fn engine() -> (AudioEngine, CommandSender, Arc<EngineAtomics>) {
        let atomics = Arc::new(EngineAtomics::default());
        let (tx, rx) = command_channel();
        let mut engine = AudioEngine::new(Arc::clone(&atomics), rx, None);
        engine.about_to_start(48000, BLOCK);
        (engine, tx, atomics)
    }

    fn run_blocks(engine: &mut AudioEngine, count: usize) -> f32 {
        let mut output = StereoBuffer::silence(BLOCK);
        let mut peak = 0.0f32;
        for _ in 0..count {
            engine.process(&mut output);
            assert!(output.as_interleaved().iter().all(|s| s.is_finite()));
            peak = peak.max(output.peak());
        }
        peak
    }

    #[test]
    fn test_silence_without_source() {
        let (mut engine, _tx, atomics) = engine();
        atomics.set_play_state(PlayState::Playing);

        let mut output = StereoBuffer::from_interleaved(&[1.0; BLOCK * 2]);
        engine.process(&mut output);
        assert_eq!(output.peak(), 0.0);
    }

    #[test]
    fn test_unprepared_engine_outputs_silence() {
        let atomics = Arc::new(EngineAtomics::default());
        let (mut tx, rx) = command_channel();
        let mut engine = AudioEngine::new(Arc::clone(&atomics), rx, None);
        tx.send(EngineCommand::LoadSource(sine_track(1.0))).unwrap();
        atomics.set_play_state(PlayState::Playing);

        let mut output = StereoBuffer::from_interleaved(&[1.0; BLOCK * 2]);
        engine.process(&mut output);
        assert_eq!(output.peak(), 0.0);
        assert!((atomics.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_playback_advances_position_and_produces_audio() {
        let (mut engine, mut tx, atomics) = engine();
        tx.send(EngineCommand::LoadSource(sine_track(5.0))).unwrap();
        atomics.set_play_state(PlayState::Playing);

        let peak = run_blocks(&mut engine, 100);

        // 100 blocks of 10ms at 1x
        assert!((atomics.position() - 1.0).abs() < 0.01);
        assert!(peak > 0.1);
    }

    #[test]
    fn test_paused_engine_holds_position() {
        let (mut engine, mut tx, atomics) = engine();
        tx.send(EngineCommand::LoadSource(sine_track(5.0))).unwrap();
        atomics.set_play_state(PlayState::Playing);
        run_blocks(&mut engine, 10);
        let held = atomics.position();

        atomics.set_play_state(PlayState::Stopped);
        let peak = run_blocks(&mut engine, 10);
        assert_eq!(peak, 0.0);
        assert_eq!(atomics.position(), held);
    }

    #[test]
    fn test_tempo_changes_consumption_rate() {
        let (mut engine, mut tx, atomics) = engine();
        atomics.set_tempo_ratio(2.0);
        engine.about_to_start(48000, BLOCK);
        tx.send(EngineCommand::LoadSource(sine_track(5.0))).unwrap();
        atomics.set_play_state(PlayState::Playing);

        run_blocks(&mut engine, 100);
        assert!((atomics.position() - 2.0).abs() < 0.02);
    }

    #[test]
    fn test_end_of_stream_stops() {
        let (mut engine, mut tx, atomics) = engine();
        tx.send(EngineCommand::LoadSource(sine_track(0.5))).unwrap();
        atomics.set_play_state(PlayState::Playing);

        run_blocks(&mut engine, 100);
        assert_eq!(atomics.play_state(), PlayState::Stopped);
        assert!((atomics.position() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_loop_keeps_position_inside_region() {
        let (mut engine, mut tx, atomics) = engine();
        tx.send(EngineCommand::LoadSource(sine_track(10.0))).unwrap();
        let mut output = StereoBuffer::silence(BLOCK);
        engine.process(&mut output);

        atomics.set_loop_points(2.0, 4.0);
        atomics.set_loop_enabled(true);
        tx.send(EngineCommand::Seek(3.5)).unwrap();
        atomics.set_play_state(PlayState::Playing);

        for _ in 0..300 {
            engine.process(&mut output);
            let position = atomics.position();
            assert!((2.0..4.0).contains(&position), "position {}", position);
        }
        assert!(atomics.is_playing());
    }

    #[test]
    fn test_stop_command_rewinds() {
        let (mut engine, mut tx, atomics) = engine();
        tx.send(EngineCommand::LoadSource(sine_track(5.0))).unwrap();
        atomics.set_play_state(PlayState::Playing);
        run_blocks(&mut engine, 20);
        assert!(atomics.position() > 0.0);

        atomics.set_play_state(PlayState::Stopped);
        tx.send(EngineCommand::Stop).unwrap();
        run_blocks(&mut engine, 1);
        assert_eq!(atomics.position(), 0.0);
    }

    #[test]
    fn test_unload_stops_and_clears_duration() {
        let (mut engine, mut tx, atomics) = engine();
        tx.send(EngineCommand::LoadSource(sine_track(1.0))).unwrap();
        atomics.set_play_state(PlayState::Playing);
        run_blocks(&mut engine, 2);

        tx.send(EngineCommand::UnloadSource).unwrap();
        let peak = run_blocks(&mut engine, 1);
        assert_eq!(peak, 0.0);
        assert!(!atomics.is_playing());
        assert_eq!(atomics.duration(), 0.0);
    }

    fn engine_with_analysis() -> (AudioEngine, CommandSender, Arc<EngineAtomics>, AnalysisWorker) {
        let atomics = Arc::new(EngineAtomics::default());
        let (tx, rx) = command_channel();
        // Never started, so nothing drains the queue
        let (worker, feeder) = AnalysisWorker::with_builtin_detectors();
        let mut engine = AudioEngine::new(Arc::clone(&atomics), rx, Some(feeder));
        engine.about_to_start(48000, BLOCK);
        (engine, tx, atomics, worker)
    }

    #[test]
    fn test_analysis_fed_only_while_playing() {
        let (mut engine, mut tx, atomics, worker) = engine_with_analysis();
        tx.send(EngineCommand::LoadSource(sine_track(5.0))).unwrap();

        run_blocks(&mut engine, 5);
        assert_eq!(worker.fed_seconds(), 0.0);

        atomics.set_play_state(PlayState::Playing);
        run_blocks(&mut engine, 10);
        let fed = worker.fed_seconds();
        assert!((fed - 0.1).abs() < 1e-9, "fed {}", fed);

        atomics.set_play_state(PlayState::Stopped);
        run_blocks(&mut engine, 10);
        assert_eq!(worker.fed_seconds(), fed);

        worker.clear_results();
        assert_eq!(worker.fed_seconds(), 0.0);
    }

    #[test]
    fn test_full_analysis_queue_drops_without_stalling() {
        let (mut engine, mut tx, atomics, worker) = engine_with_analysis();
        tx.send(EngineCommand::LoadSource(sine_track(5.0))).unwrap();
        atomics.set_play_state(PlayState::Playing);

        let peak = run_blocks(&mut engine, 100);

        // Playback carries on after the queue fills
        assert!(peak > 0.1);
        assert!((atomics.position() - 1.0).abs() < 0.01);
        let queued_blocks = (RING_CAPACITY - 1) / BLOCK;
        let expected = (queued_blocks * BLOCK) as f64 / 48000.0;
        assert!((worker.fed_seconds() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_stopped_releases_stretcher() {
        let (mut engine, mut tx, atomics) = engine();
        tx.send(EngineCommand::LoadSource(sine_track(1.0))).unwrap();
        atomics.set_play_state(PlayState::Playing);

        engine.stopped();
        assert!(!engine.is_prepared());
        let peak = run_blocks(&mut engine, 3);
        assert_eq!(peak, 0.0);
    }
}
