//! Control-thread facade over the engine, analysis worker and audio output
//!
//! [`Player`] is what an application talks to. It never blocks the audio
//! thread: parameters are stored in [`EngineAtomics`], ownership transfers go
//! through the command queue, and analysis results are read as snapshots.

mod loop_edit;
mod loop_record;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use basedrop::Owned;
use thiserror::Error;

use crate::analysis::{AnalysisResult, AnalysisWorker};
use crate::audio::{start_audio_output, AudioConfig, AudioError, AudioHandle};
use crate::config::PlayerConfig;
use crate::engine::{
    command_channel, gc_handle, AudioEngine, CommandSender, EngineAtomics, EngineCommand,
    PlayState,
};
use crate::eq::EqSettings;
use crate::transport::{DecodeError, DecodedTrack, Decoder, LoopRegion};
use crate::types::StereoBuffer;

pub use loop_edit::{
    bar_duration, BeatGrid, LoopEditor, DEFAULT_BAR_SECS, DEFAULT_GRID_BPM, MAX_GRID_BPM,
    MIN_GRID_BPM, MIN_LOOP_SECS,
};
pub use loop_record::{
    LoopRecordAction, LoopRecordState, LoopRecorder, DEFAULT_LOOP_OVERLAP_MS,
    MAX_LOOP_OVERLAP_MS,
};

/// Errors from control-thread operations
#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Failed to load file: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    /// The audio thread has not drained earlier commands yet
    #[error("Engine command queue is full")]
    CommandQueueFull,

    #[error("No file loaded")]
    NoFileLoaded,

    #[error("Deferred deallocation thread is not running")]
    GcUnavailable,
}

pub type PlayerResult<T> = Result<T, PlayerError>;

/// The practice player
pub struct Player {
    atomics: Arc<EngineAtomics>,
    commands: CommandSender,
    engine: Arc<Mutex<AudioEngine>>,
    worker: AnalysisWorker,
    audio: Option<AudioHandle>,
    gc: basedrop::Handle,
    editor: LoopEditor,
    grid: BeatGrid,
    recorder: LoopRecorder,
    /// Rate files are decoded to; follows the output device
    decode_rate: u32,
    loaded: bool,
    current_path: Option<PathBuf>,
}

impl Player {
    pub fn new(config: &PlayerConfig) -> PlayerResult<Self> {
        let gc = gc_handle().ok_or(PlayerError::GcUnavailable)?;

        let atomics = Arc::new(EngineAtomics::new(config.eq.clamped()));
        atomics.set_edge_bleed_ms(config.edge_bleed_ms);

        let (commands, command_rx) = command_channel();
        let (worker, feeder) = AnalysisWorker::with_builtin_detectors();
        worker.set_analysis_enabled(config.analysis_enabled);
        let engine = AudioEngine::new(Arc::clone(&atomics), command_rx, Some(feeder));

        Ok(Self {
            atomics,
            commands,
            engine: Arc::new(Mutex::new(engine)),
            worker,
            audio: None,
            gc,
            editor: LoopEditor::new(),
            grid: BeatGrid::new(config.grid_bpm, config.snap_to_grid),
            recorder: LoopRecorder::new(config.loop_overlap_ms),
            decode_rate: config.audio.target_sample_rate(),
            loaded: false,
            current_path: None,
        })
    }

    /// Shared parameter block (for UIs that poll it directly)
    pub fn atomics(&self) -> Arc<EngineAtomics> {
        Arc::clone(&self.atomics)
    }

    fn send(&mut self, cmd: EngineCommand) -> PlayerResult<()> {
        self.commands
            .send(cmd)
            .map_err(|_| PlayerError::CommandQueueFull)
    }

    fn require_loaded(&self) -> PlayerResult<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(PlayerError::NoFileLoaded)
        }
    }

    fn lock_engine(&self) -> MutexGuard<'_, AudioEngine> {
        self.engine.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────

    /// Decode `path` at the output rate and make it the current source
    pub fn load_file(&mut self, path: &Path) -> PlayerResult<()> {
        let track = DecodedTrack::open(path, self.decode_rate)?;
        self.load_decoder(Box::new(track))?;
        self.current_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Make `decoder` the current source
    ///
    /// Playback stops, the loop is cleared and analysis starts over.
    pub fn load_decoder(&mut self, decoder: Box<dyn Decoder>) -> PlayerResult<()> {
        let duration = decoder.total_length();
        let source = Owned::new(&self.gc, decoder);
        self.send(EngineCommand::LoadSource(source))?;

        self.loaded = true;
        self.current_path = None;
        self.atomics.set_play_state(PlayState::Stopped);
        self.atomics.set_duration(duration);
        self.atomics.set_position(0.0);
        self.editor.clear(&self.atomics);
        self.recorder.reset();
        self.worker.clear_results();

        log::info!("Player: loaded source ({:.2}s)", duration);
        Ok(())
    }

    /// Unload the current source
    pub fn close_file(&mut self) -> PlayerResult<()> {
        if !self.loaded {
            return Ok(());
        }
        self.send(EngineCommand::UnloadSource)?;
        self.loaded = false;
        self.current_path = None;
        self.atomics.set_play_state(PlayState::Stopped);
        self.atomics.set_duration(0.0);
        self.atomics.set_position(0.0);
        self.editor.clear(&self.atomics);
        self.recorder.reset();
        self.worker.clear_results();
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────

    /// Start playback; at the end of the file it restarts from 0
    pub fn play(&mut self) -> PlayerResult<()> {
        self.require_loaded()?;
        let at_end = self.position() >= self.duration();
        if at_end && !self.atomics.loop_enabled() {
            self.seek(0.0)?;
        }
        self.atomics.set_play_state(PlayState::Playing);
        Ok(())
    }

    /// Stop playback and keep the position
    pub fn pause(&mut self) {
        self.atomics.set_play_state(PlayState::Stopped);
    }

    /// Stop playback and rewind to 0
    pub fn stop(&mut self) -> PlayerResult<()> {
        self.atomics.set_play_state(PlayState::Stopped);
        if self.loaded {
            self.send(EngineCommand::Stop)?;
        }
        self.atomics.set_position(0.0);
        Ok(())
    }

    pub fn toggle_play(&mut self) -> PlayerResult<()> {
        if self.is_playing() {
            self.pause();
            Ok(())
        } else {
            self.play()
        }
    }

    /// Move the playhead (clamped to the file)
    pub fn seek(&mut self, seconds: f64) -> PlayerResult<()> {
        self.require_loaded()?;
        let seconds = seconds.clamp(0.0, self.duration());
        self.send(EngineCommand::Seek(seconds))?;
        self.atomics.set_position(seconds);
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.atomics.is_playing()
    }

    pub fn play_state(&self) -> PlayState {
        self.atomics.play_state()
    }

    /// Playhead in seconds
    pub fn position(&self) -> f64 {
        self.atomics.position()
    }

    pub fn duration(&self) -> f64 {
        self.atomics.duration()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tempo, pitch, EQ
    // ─────────────────────────────────────────────────────────────────────

    /// Playback speed, clamped to 0.25–4.0
    pub fn set_tempo_ratio(&self, ratio: f32) {
        self.atomics.set_tempo_ratio(ratio);
    }

    pub fn tempo_ratio(&self) -> f32 {
        self.atomics.tempo_ratio()
    }

    /// Pitch shift, clamped to ±24 semitones
    pub fn set_pitch_semitones(&self, semitones: f32) {
        self.atomics.set_pitch_semitones(semitones);
    }

    pub fn pitch_semitones(&self) -> f32 {
        self.atomics.pitch_semitones()
    }

    pub fn set_eq_low_shelf(&self, freq: f32, gain_db: f32) {
        self.atomics.eq.set_low_shelf(freq, gain_db);
    }

    pub fn set_eq_peak(&self, freq: f32, gain_db: f32, q: f32) {
        self.atomics.eq.set_peak(freq, gain_db, q);
    }

    pub fn set_eq_high_shelf(&self, freq: f32, gain_db: f32) {
        self.atomics.eq.set_high_shelf(freq, gain_db);
    }

    pub fn set_eq_bypass(&self, bypass: bool) {
        self.atomics.eq.set_bypass(bypass);
    }

    pub fn eq_settings(&self) -> EqSettings {
        self.atomics.eq.snapshot()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Looping
    // ─────────────────────────────────────────────────────────────────────

    pub fn loop_region(&self) -> LoopRegion {
        self.atomics.loop_region()
    }

    pub fn is_looping(&self) -> bool {
        self.atomics.loop_region().is_active()
    }

    /// Place loop start at the playhead
    pub fn set_loop_a(&mut self) {
        let position = self.position();
        self.editor.set_a(&self.atomics, &self.grid, position);
    }

    /// Place loop end at the playhead
    pub fn set_loop_b(&mut self) {
        let position = self.position();
        self.editor.set_b(&self.atomics, &self.grid, position);
    }

    /// Loop `[start, end]` directly
    pub fn set_loop_region(&mut self, start: f64, end: f64) {
        self.editor.set_region(&self.atomics, start, end);
    }

    pub fn clear_loop(&mut self) {
        self.editor.clear(&self.atomics);
    }

    pub fn jog_loop_start(&self, delta: f64) -> bool {
        self.editor.jog_start(&self.atomics, delta)
    }

    pub fn jog_loop_end(&self, delta: f64) -> bool {
        self.editor.jog_end(&self.atomics, delta)
    }

    pub fn double_loop(&self) -> bool {
        self.editor.double(&self.atomics)
    }

    pub fn halve_loop(&self) -> bool {
        self.editor.halve(&self.atomics)
    }

    pub fn move_loop_forward(&self) -> bool {
        self.editor.move_forward(&self.atomics)
    }

    pub fn move_loop_backward(&self) -> bool {
        self.editor.move_backward(&self.atomics)
    }

    /// Bar length from the latest analysis (2s without a valid tempo)
    pub fn bar_duration(&self) -> f64 {
        bar_duration(&self.worker.latest_results())
    }

    pub fn extend_loop_by_bar(&self) -> bool {
        self.editor.extend_by_bar(&self.atomics, self.bar_duration())
    }

    pub fn shorten_loop_by_bar(&self) -> bool {
        self.editor.shorten_by_bar(&self.atomics, self.bar_duration())
    }

    pub fn snap_loop_start_to_beat(&self) -> bool {
        self.editor
            .snap_start_to_beat(&self.atomics, &self.worker.latest_results())
    }

    pub fn snap_loop_end_to_beat(&self) -> bool {
        self.editor
            .snap_end_to_beat(&self.atomics, &self.worker.latest_results())
    }

    pub fn snap_loop_to_beats(&self) -> bool {
        self.editor
            .snap_to_beats(&self.atomics, &self.worker.latest_results())
    }

    /// Loop `bars` bars from the playhead
    pub fn loop_here(&mut self, bars: u32) -> bool {
        let position = self.position();
        let bar = self.bar_duration();
        self.editor.loop_here(&self.atomics, position, bars, bar)
    }

    /// Loop-edge fade length, clamped to 0–100 ms
    pub fn set_edge_bleed_ms(&self, ms: f32) {
        self.atomics.set_edge_bleed_ms(ms);
    }

    pub fn edge_bleed_ms(&self) -> f32 {
        self.atomics.edge_bleed_ms()
    }

    // ─────────────────────────────────────────────────────────────────────
    // BPM grid
    // ─────────────────────────────────────────────────────────────────────

    /// Grid tempo, clamped to 60–200
    pub fn set_grid_bpm(&mut self, bpm: f64) {
        self.grid.set_bpm(bpm);
    }

    pub fn grid_bpm(&self) -> f64 {
        self.grid.bpm()
    }

    pub fn set_snap_to_grid(&mut self, enabled: bool) {
        self.grid.set_snap_enabled(enabled);
    }

    pub fn is_snap_to_grid(&self) -> bool {
        self.grid.snap_enabled()
    }

    /// Nearest grid line when snapping is on, else `seconds` unchanged
    pub fn snap_to_grid(&self, seconds: f64) -> f64 {
        self.grid.snap(seconds)
    }

    /// Grid lines across the loaded file
    pub fn grid_positions(&self) -> Vec<f64> {
        self.grid.positions(self.duration())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Loop recording
    // ─────────────────────────────────────────────────────────────────────

    /// Advance Idle → Recording → Looping → Idle
    ///
    /// The new state is only committed once its side effects succeeded.
    pub fn toggle_loop_record(&mut self) -> PlayerResult<LoopRecordState> {
        self.require_loaded()?;
        let mut next = self.recorder.clone();
        match next.toggle(self.position()) {
            LoopRecordAction::StartRecording { start } => {
                log::debug!("Loop record: recording from {:.3}s", start);
            }
            LoopRecordAction::StartLooping { start, end } => {
                self.seek(start)?;
                self.editor.set_region(&self.atomics, start, end);
                self.atomics.set_play_state(PlayState::Playing);
                log::debug!("Loop record: looping {:.3}s–{:.3}s", start, end);
            }
            LoopRecordAction::ClearLoop => self.clear_loop(),
        }
        self.recorder = next;
        Ok(self.recorder.state())
    }

    pub fn loop_record_state(&self) -> LoopRecordState {
        self.recorder.state()
    }

    /// Tail added to recorded loops, clamped to 0–300 ms
    pub fn set_loop_overlap_ms(&mut self, ms: u32) {
        self.recorder.set_overlap_ms(ms);
    }

    pub fn loop_overlap_ms(&self) -> u32 {
        self.recorder.overlap_ms()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Analysis
    // ─────────────────────────────────────────────────────────────────────

    pub fn set_analysis_enabled(&self, enabled: bool) {
        self.worker.set_analysis_enabled(enabled);
    }

    pub fn is_analysis_enabled(&self) -> bool {
        self.worker.is_analysis_enabled()
    }

    pub fn is_analysis_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Copy of the current analysis snapshot
    pub fn latest_results(&self) -> AnalysisResult {
        self.worker.latest_results()
    }

    pub fn clear_results(&self) {
        self.worker.clear_results();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Audio output
    // ─────────────────────────────────────────────────────────────────────

    /// Open the output device and start playback processing
    ///
    /// Starts the analysis worker at the device rate. If the device rate
    /// differs from the rate the current file was decoded at, the file is
    /// decoded again and the playhead restored.
    pub fn start_audio(&mut self, config: &AudioConfig) -> PlayerResult<()> {
        if self.audio.is_some() {
            return Ok(());
        }
        let handle = start_audio_output(config, Arc::clone(&self.engine))?;
        let sample_rate = handle.sample_rate();
        self.audio = Some(handle);
        self.worker.start(sample_rate);

        if sample_rate != self.decode_rate {
            self.decode_rate = sample_rate;
            self.reload_current_file()?;
        }
        Ok(())
    }

    /// Decode the current file again at the decode rate
    ///
    /// Playhead, play state, loop points and loop-record state carry over;
    /// they are all in seconds, so the rate change does not move them.
    fn reload_current_file(&mut self) -> PlayerResult<()> {
        let Some(path) = self.current_path.clone() else {
            return Ok(());
        };
        log::info!("Player: decoding {:?} again at {}Hz", path, self.decode_rate);

        let position = self.position();
        let was_playing = self.is_playing();
        let region = self.loop_region();
        let editor = self.editor.clone();
        let recorder = self.recorder.clone();

        self.load_file(&path)?;

        self.atomics.set_loop_points(region.start, region.end);
        self.atomics.set_loop_enabled(region.enabled);
        self.editor = editor;
        self.recorder = recorder;
        self.seek(position)?;
        if was_playing {
            self.atomics.set_play_state(PlayState::Playing);
        }
        Ok(())
    }

    /// Stop the output device and the analysis worker
    pub fn stop_audio(&mut self) {
        if let Some(handle) = self.audio.take() {
            drop(handle);
            self.worker.stop();
            self.atomics.set_play_state(PlayState::Stopped);
        }
    }

    pub fn is_audio_running(&self) -> bool {
        self.audio.is_some()
    }

    /// Output device rate while audio is running
    pub fn audio_sample_rate(&self) -> Option<u32> {
        self.audio.as_ref().map(AudioHandle::sample_rate)
    }

    pub fn audio_latency_ms(&self) -> Option<f32> {
        self.audio.as_ref().map(AudioHandle::latency_ms)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Offline rendering
    // ─────────────────────────────────────────────────────────────────────

    /// Prepare the engine for [`render_block`](Self::render_block) without
    /// an output device
    ///
    /// Ignored while audio is running.
    pub fn prepare_offline(&mut self, sample_rate: u32, max_block_size: usize) {
        if self.audio.is_some() {
            return;
        }
        self.decode_rate = sample_rate;
        self.lock_engine().about_to_start(sample_rate, max_block_size);
    }

    /// Render one block in the calling thread
    ///
    /// While a device stream is running the block is left silent.
    pub fn render_block(&self, output: &mut StereoBuffer) {
        if self.audio.is_some() {
            output.fill_silence();
            return;
        }
        self.lock_engine().process(output);
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop_audio();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 48000;
    const BLOCK: usize = 480;

    fn ramp_track(seconds: f64) -> Box<dyn Decoder> {
        let frames = (seconds * RATE as f64) as usize;
        let samples: Vec<f32> = (0..frames)
            .flat_map(|i| {
                let v = (2.0 * std::f32::consts::PI * 330.0 * i as f32 / RATE as f32).sin() * 0.4;
                [v, v]
            })
            .collect();
        Box::new(DecodedTrack::from_interleaved(samples, RATE))
    }

    fn player_with_track(seconds: f64) -> Player {
        let mut config = PlayerConfig::default();
        config.analysis_enabled = false;
        let mut player = Player::new(&config).unwrap();
        player.prepare_offline(RATE, BLOCK);
        player.load_decoder(ramp_track(seconds)).unwrap();
        player
    }

    fn render(player: &Player, blocks: usize) {
        let mut output = StereoBuffer::silence(BLOCK);
        for _ in 0..blocks {
            player.render_block(&mut output);
        }
    }

    fn region(player: &Player) -> (f64, f64) {
        let r = player.loop_region();
        (r.start, r.end)
    }

    #[test]
    fn test_transport_requires_file() {
        let mut player = Player::new(&PlayerConfig::default()).unwrap();
        assert!(matches!(player.play(), Err(PlayerError::NoFileLoaded)));
        assert!(matches!(player.seek(1.0), Err(PlayerError::NoFileLoaded)));
        assert!(matches!(player.toggle_loop_record(), Err(PlayerError::NoFileLoaded)));
        assert!(player.stop().is_ok());
    }

    #[test]
    fn test_new_applies_config() {
        let mut config = PlayerConfig::default();
        config.edge_bleed_ms = 250.0;
        config.loop_overlap_ms = 20;
        config.snap_to_grid = true;
        config.grid_bpm = 90.0;
        config.eq.peak_gain_db = 40.0;

        let player = Player::new(&config).unwrap();
        assert_eq!(player.edge_bleed_ms(), 100.0);
        assert_eq!(player.loop_overlap_ms(), 20);
        assert!(player.is_snap_to_grid());
        assert_eq!(player.grid_bpm(), 90.0);
        assert_eq!(player.eq_settings().peak_gain_db, 24.0);
    }

    #[test]
    fn test_load_resets_loop_and_position() {
        let mut player = player_with_track(10.0);
        assert!(player.is_loaded());
        assert!((player.duration() - 10.0).abs() < 1e-9);
        assert_eq!(region(&player), (0.0, player.duration()));
        assert!(!player.is_looping());

        player.set_loop_region(2.0, 4.0);
        player.load_decoder(ramp_track(6.0)).unwrap();
        assert!(!player.is_looping());
        assert_eq!(player.position(), 0.0);
        assert!((region(&player).1 - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_play_pause_stop() {
        let mut player = player_with_track(10.0);
        player.play().unwrap();
        render(&player, 100);
        assert!((player.position() - 1.0).abs() < 1e-6);

        player.pause();
        render(&player, 10);
        assert!((player.position() - 1.0).abs() < 1e-6);

        player.toggle_play().unwrap();
        assert!(player.is_playing());
        player.stop().unwrap();
        render(&player, 1);
        assert_eq!(player.position(), 0.0);
        assert!(!player.is_playing());
    }

    #[test]
    fn test_play_at_end_restarts() {
        let mut player = player_with_track(0.5);
        player.play().unwrap();
        render(&player, 60);
        assert!(!player.is_playing());

        player.play().unwrap();
        render(&player, 1);
        assert!(player.position() < 0.1);
    }

    #[test]
    fn test_loop_points_snap_to_grid() {
        let mut player = player_with_track(10.0);
        player.set_snap_to_grid(true);

        player.seek(2.1).unwrap();
        player.set_loop_a();
        assert!(!player.is_looping());
        player.seek(3.9).unwrap();
        player.set_loop_b();

        assert_eq!(region(&player), (2.0, 4.0));
        assert!(player.is_looping());
    }

    #[test]
    fn test_loop_playback_stays_in_region() {
        let mut player = player_with_track(10.0);
        player.set_loop_region(2.0, 4.0);
        player.seek(2.0).unwrap();
        player.play().unwrap();

        for _ in 0..500 {
            render(&player, 1);
            let pos = player.position();
            assert!((2.0..4.0).contains(&pos), "position {} left the loop", pos);
        }
        assert!(player.is_playing());
    }

    #[test]
    fn test_bar_operations_use_default_bar() {
        let mut player = player_with_track(10.0);
        assert_eq!(player.bar_duration(), DEFAULT_BAR_SECS);

        player.set_loop_region(1.0, 2.0);
        assert!(player.extend_loop_by_bar());
        assert_eq!(region(&player), (1.0, 4.0));
        assert!(player.shorten_loop_by_bar());
        assert_eq!(region(&player), (1.0, 2.0));
        assert!(!player.shorten_loop_by_bar());

        // No beats detected yet
        assert!(!player.snap_loop_to_beats());
    }

    #[test]
    fn test_loop_here() {
        let mut player = player_with_track(10.0);
        player.seek(3.0).unwrap();
        assert!(player.loop_here(2));
        assert_eq!(region(&player), (3.0, 7.0));
        assert!(player.is_looping());
    }

    #[test]
    fn test_loop_record_cycle() {
        let mut player = player_with_track(10.0);
        player.set_loop_overlap_ms(100);
        player.play().unwrap();

        player.seek(1.0).unwrap();
        assert_eq!(player.toggle_loop_record().unwrap(), LoopRecordState::Recording);
        assert!(!player.is_looping());

        player.seek(3.0).unwrap();
        assert_eq!(player.toggle_loop_record().unwrap(), LoopRecordState::Looping);
        let (start, end) = region(&player);
        assert_eq!(start, 1.0);
        assert!((end - 3.1).abs() < 1e-9);
        assert!(player.is_looping());
        assert!(player.is_playing());
        assert_eq!(player.position(), 1.0);

        assert_eq!(player.toggle_loop_record().unwrap(), LoopRecordState::Idle);
        assert!(!player.is_looping());
        assert_eq!(region(&player), (0.0, player.duration()));
    }

    #[test]
    fn test_grid_positions_cover_file() {
        let mut player = player_with_track(2.0);
        player.set_grid_bpm(120.0);
        assert_eq!(player.grid_positions().len(), 5);

        player.set_snap_to_grid(false);
        assert_eq!(player.snap_to_grid(1.3), 1.3);
        player.set_snap_to_grid(true);
        assert_eq!(player.snap_to_grid(1.3), 1.5);
    }

    #[test]
    fn test_close_file() {
        let mut player = player_with_track(4.0);
        player.play().unwrap();
        render(&player, 10);

        player.close_file().unwrap();
        assert!(!player.is_loaded());
        assert!(!player.is_playing());
        assert_eq!(player.duration(), 0.0);

        let mut output = StereoBuffer::from_interleaved(&[1.0; BLOCK * 2]);
        player.render_block(&mut output);
        assert_eq!(output.peak(), 0.0);
    }

    #[test]
    fn test_missing_file_is_decode_error() {
        let mut player = Player::new(&PlayerConfig::default()).unwrap();
        let err = player.load_file(Path::new("/nonexistent/riff/track.flac")).unwrap_err();
        assert!(matches!(err, PlayerError::Decode(_)));
        assert!(!player.is_loaded());
    }

    #[test]
    fn test_failed_loop_record_keeps_state() {
        let mut player = player_with_track(10.0);
        render(&player, 1);
        player.seek(2.0).unwrap();
        assert_eq!(player.toggle_loop_record().unwrap(), LoopRecordState::Recording);

        // Nothing drains the queue until the next render
        while player.seek(2.0).is_ok() {}
        assert!(matches!(player.toggle_loop_record(), Err(PlayerError::CommandQueueFull)));
        assert_eq!(player.loop_record_state(), LoopRecordState::Recording);
        assert!(!player.is_looping());
        assert!(!player.is_playing());

        render(&player, 1);
        assert_eq!(player.toggle_loop_record().unwrap(), LoopRecordState::Looping);
        assert!(player.is_looping());
    }

    #[test]
    fn test_reload_keeps_loop_and_playhead() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..88200 {
            let v = ((i as f32 * 0.03).sin() * 12000.0) as i16;
            writer.write_sample(v).unwrap();
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();

        let mut config = PlayerConfig::default();
        config.analysis_enabled = false;
        let mut player = Player::new(&config).unwrap();
        player.prepare_offline(RATE, BLOCK);
        player.load_file(&path).unwrap();
        render(&player, 1);

        player.set_loop_region(0.5, 1.5);
        player.seek(1.0).unwrap();
        player.toggle_loop_record().unwrap();
        player.play().unwrap();

        // Device opened at the file's own rate
        player.decode_rate = 44100;
        player.reload_current_file().unwrap();

        let (start, end) = region(&player);
        assert!((start - 0.5).abs() < 1e-9 && (end - 1.5).abs() < 1e-9);
        assert!(player.is_looping());
        assert!((player.position() - 1.0).abs() < 1e-9);
        assert!(player.is_playing());
        assert_eq!(player.loop_record_state(), LoopRecordState::Recording);
        assert!((player.duration() - 2.0).abs() < 1e-3);
        assert_eq!(player.current_path(), Some(path.as_path()));
    }

    #[test]
    fn test_load_restarts_analysis() {
        let mut player = Player::new(&PlayerConfig::default()).unwrap();
        player.prepare_offline(RATE, BLOCK);
        player.load_decoder(ramp_track(4.0)).unwrap();
        player.play().unwrap();
        render(&player, 10);
        assert!(player.worker.fed_seconds() > 0.0);

        player.load_decoder(ramp_track(2.0)).unwrap();
        assert_eq!(player.worker.fed_seconds(), 0.0);
        assert!(player.latest_results().beats.is_empty());
    }
}
